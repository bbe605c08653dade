// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Errors that can occur while building views, evaluating rules and driving
//! the flagging loop.

use thiserror::Error;

#[derive(Error, Debug)]
/// All the errors that can occur in flagging operations
pub enum FlaggingError {
    #[error("bad array shape supplied to argument {argument} of function {function}. expected {expected}, received {received}")]
    /// Error for bad array shape in provided argument
    BadArrayShape {
        /// The argument name within the function
        argument: String,
        /// The function name
        function: String,
        /// The expected shape
        expected: String,
        /// The shape that was received instead
        received: String,
    },

    #[error("a {expected}-dimensional view needs {expected} axes, but {received} were supplied")]
    /// Error for a view whose axis count doesn't match its dimensionality
    BadAxisCount {
        /// The dimensionality of the view data
        expected: usize,
        /// The number of axes supplied
        received: usize,
    },

    #[error("bad rule: '{0}'")]
    /// A rule name that doesn't name any rule kind.
    UnknownRule(String),

    #[error("invalid parameter '{parameter}' for rule '{rule}': {reason}")]
    /// A rule (or flagger) parameter outside its valid domain.
    InvalidRuleParameter {
        /// The rule name
        rule: String,
        /// The parameter name
        parameter: String,
        /// What is wrong with it
        reason: String,
    },

    #[error("no flag reason is registered for code {0}")]
    /// A reason-plane code with no entry in the reason table.
    UnknownFlagReason(u8),

    #[error("{task} failed: {message}")]
    /// An external collaborator (data task, view task or flag setter) failed.
    Task {
        /// Which collaborator failed
        task: String,
        /// Its description of the failure
        message: String,
    },
}

impl FlaggingError {
    /// Convenience constructor for [`FlaggingError::InvalidRuleParameter`].
    pub(crate) fn invalid_parameter(rule: &str, parameter: &str, reason: impl Into<String>) -> Self {
        FlaggingError::InvalidRuleParameter {
            rule: rule.to_string(),
            parameter: parameter.to_string(),
            reason: reason.into(),
        }
    }
}
