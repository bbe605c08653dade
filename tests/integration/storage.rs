// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! An in-memory stand-in for a measurement set: a list of tables, each with
//! the scope and axes of one view, that flag commands are applied to.

use std::{cell::RefCell, rc::Rc};

use ndarray::{Array, ArrayD, Dimension};

use viewflagger::{
    AxisSelection, FlagCommand, FlagCounts, FlagSetterTask, FlagSummary, FlaggableView,
    FlaggingError, SetterResult, SummaryRequest, ViewAxis, ViewCollection, ViewScope,
};

pub struct Table {
    pub scope: ViewScope,
    pub axes: Vec<ViewAxis>,
    pub data: ArrayD<f64>,
    pub flag: ArrayD<bool>,
}

impl Table {
    pub fn new<D: Dimension>(scope: ViewScope, axes: Vec<ViewAxis>, data: Array<f64, D>) -> Table {
        let data = data.into_dyn();
        let flag = ArrayD::from_elem(data.raw_dim(), false);
        Table {
            scope,
            axes,
            data,
            flag,
        }
    }

    pub fn num_flagged(&self) -> usize {
        self.flag.iter().filter(|&&f| f).count()
    }

    fn view<D: Dimension>(&self) -> Result<FlaggableView<D>, FlaggingError> {
        let to_task_error = |e: ndarray::ShapeError| FlaggingError::Task {
            task: "datatask".to_string(),
            message: e.to_string(),
        };
        let data = self.data.clone().into_dimensionality::<D>().map_err(to_task_error)?;
        let flag = self.flag.clone().into_dimensionality::<D>().map_err(to_task_error)?;
        let no_data = Array::from_elem(data.raw_dim(), false);
        FlaggableView::new(data, flag, no_data, self.axes.clone(), self.scope.clone())
    }

    fn apply(&mut self, cmd: &FlagCommand) {
        if cmd.filename != self.scope.filename {
            return;
        }
        if !cmd.spw.is_empty() && !self.scope.spw.map_or(false, |spw| cmd.spw.contains(&spw)) {
            return;
        }
        if let (Some(a), Some(b)) = (&cmd.polarization, &self.scope.pol) {
            if a != b {
                return;
            }
        }
        if let (Some(a), Some(b)) = (cmd.antenna, self.scope.antenna) {
            if a != b {
                return;
            }
        }

        let selected: Vec<Vec<bool>> = self.axes.iter().map(|axis| selected(cmd, axis)).collect();
        for (idx, f) in self.flag.indexed_iter_mut() {
            if idx
                .slice()
                .iter()
                .zip(&selected)
                .all(|(&i, axis_sel)| axis_sel[i])
            {
                *f = true;
            }
        }
    }
}

/// Which samples along `axis` a command selects.
fn selected(cmd: &FlagCommand, axis: &ViewAxis) -> Vec<bool> {
    match cmd.axis_names.iter().position(|name| axis.is_named(name)) {
        Some(p) => match &cmd.selections[p] {
            AxisSelection::Value(coord) => axis.data.iter().map(|c| c == coord).collect(),
            sel => {
                let chans = sel.channels().unwrap_or_default();
                (0..axis.len())
                    .map(|i| chans.contains(&axis.channel_at(i)))
                    .collect()
            }
        },
        None => match cmd.antenna {
            Some(ant) if axis.kind().is_antenna() => {
                axis.data.iter().map(|c| c.as_index() == Some(ant)).collect()
            }
            _ => vec![true; axis.len()],
        },
    }
}

#[derive(Default)]
pub struct MockStorage {
    pub tables: Vec<Table>,
    /// Every command applied, in order.
    pub applied: Vec<FlagCommand>,
    /// The summary requests of every `set_flags` call.
    pub calls: Vec<SummaryRequest>,
    /// The number of times the views were read.
    pub reads: usize,
}

impl MockStorage {
    pub fn new(tables: Vec<Table>) -> Rc<RefCell<MockStorage>> {
        Rc::new(RefCell::new(MockStorage {
            tables,
            ..Default::default()
        }))
    }

    pub fn views<D: Dimension>(&mut self) -> Result<ViewCollection<D>, FlaggingError> {
        self.reads += 1;
        self.tables.iter().map(Table::view::<D>).collect()
    }

    pub fn num_flagged(&self) -> usize {
        self.tables.iter().map(Table::num_flagged).sum()
    }

    fn summary(&self, name: &str) -> FlagSummary {
        let mut summary = FlagSummary::new(name, FlagCounts::default());
        for table in &self.tables {
            let counts = FlagCounts::new(table.num_flagged() as u64, table.flag.len() as u64);
            let spw = table.scope.spw.map_or_else(|| "*".to_string(), |s| s.to_string());
            summary.add_to_category("spw", &spw, counts);
        }
        summary
    }
}

/// A data task reading every table as a view.
pub fn reader<D: Dimension>(
    storage: &Rc<RefCell<MockStorage>>,
) -> impl FnMut() -> Result<ViewCollection<D>, FlaggingError> {
    let storage = Rc::clone(storage);
    move || storage.borrow_mut().views()
}

/// A flag setter writing to the shared storage.
pub struct StorageFlagSetter(pub Rc<RefCell<MockStorage>>);

impl FlagSetterTask for StorageFlagSetter {
    fn set_flags(
        &mut self,
        commands: &[FlagCommand],
        summaries: SummaryRequest,
    ) -> Result<SetterResult, FlaggingError> {
        let mut storage = self.0.borrow_mut();
        storage.calls.push(summaries);
        let before = summaries.before.then(|| storage.summary("before"));
        for cmd in commands {
            for table in storage.tables.iter_mut() {
                table.apply(cmd);
            }
            storage.applied.push(cmd.clone());
        }
        let after = summaries.after.then(|| storage.summary("after"));
        Ok(SetterResult { before, after })
    }
}
