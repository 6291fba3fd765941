//! Tasks: the unit of work the pipe runs against iterated objects.
//!
//! A task either targets every object (unfiltered) or filters on one
//! object: a specific id, or the document's Root or Info object. Each task
//! carries a chain of callbacks; a callback can end the chain early, ask
//! to be unloaded, or abort the pipe.

use std::cell::RefCell;
use std::rc::Rc;

use crate::error::Result;
use crate::indirect_object::IndirectObject;
use crate::parser::Parser;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskResult {
    /// Continue with the next callback in the chain.
    Done,
    /// Stop the chain for this object.
    SkipRest,
    /// Remove this callback from the chain and continue.
    Unload,
    /// Abort the pipe; the output file is left unfinished.
    Failure,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskTarget {
    /// Runs on every iterated object.
    Everything,
    Object(u32),
    Root,
    Info,
}

pub type TaskFn =
    Box<dyn FnMut(&mut Parser, &Rc<RefCell<IndirectObject>>) -> Result<TaskResult>>;

pub(crate) struct TaskUnit {
    pub active: bool,
    pub func: TaskFn,
}

pub struct Task {
    pub(crate) target: TaskTarget,
    pub(crate) units: Vec<TaskUnit>,
}

impl Task {
    fn with_target(
        target: TaskTarget,
        func: impl FnMut(&mut Parser, &Rc<RefCell<IndirectObject>>) -> Result<TaskResult> + 'static,
    ) -> Task {
        Task {
            target,
            units: vec![TaskUnit {
                active: true,
                func: Box::new(func),
            }],
        }
    }

    /// A mutator for a specific object id.
    pub fn for_object(
        id: u32,
        func: impl FnMut(&mut Parser, &Rc<RefCell<IndirectObject>>) -> Result<TaskResult> + 'static,
    ) -> Task {
        Task::with_target(TaskTarget::Object(id), func)
    }

    /// A mutator for the document's Root object.
    pub fn for_root(
        func: impl FnMut(&mut Parser, &Rc<RefCell<IndirectObject>>) -> Result<TaskResult> + 'static,
    ) -> Task {
        Task::with_target(TaskTarget::Root, func)
    }

    /// A mutator for the document's Info object.
    pub fn for_info(
        func: impl FnMut(&mut Parser, &Rc<RefCell<IndirectObject>>) -> Result<TaskResult> + 'static,
    ) -> Task {
        Task::with_target(TaskTarget::Info, func)
    }

    /// A task run on every iterated object.
    pub fn unfiltered(
        func: impl FnMut(&mut Parser, &Rc<RefCell<IndirectObject>>) -> Result<TaskResult> + 'static,
    ) -> Task {
        Task::with_target(TaskTarget::Everything, func)
    }

    /// Append another callback to this task's chain. Chained callbacks run
    /// in order on each qualifying object.
    pub fn and_then(
        mut self,
        func: impl FnMut(&mut Parser, &Rc<RefCell<IndirectObject>>) -> Result<TaskResult> + 'static,
    ) -> Task {
        self.units.push(TaskUnit {
            active: true,
            func: Box::new(func),
        });
        self
    }
}

/// Run a chain. `Unload` removes the callback in place; `SkipRest` and
/// `Failure` end the chain and are reported to the caller.
pub(crate) fn exec_chain(
    units: &mut Vec<TaskUnit>,
    parser: &mut Parser,
    object: &Rc<RefCell<IndirectObject>>,
) -> Result<TaskResult> {
    let mut result = TaskResult::Done;
    let mut i = 0;
    while i < units.len() {
        result = if units[i].active {
            (units[i].func)(parser, object)?
        } else {
            TaskResult::Done
        };
        match result {
            TaskResult::Unload => {
                units.remove(i);
                result = TaskResult::Done;
            }
            TaskResult::Done => i += 1,
            TaskResult::SkipRest | TaskResult::Failure => break,
        }
    }
    Ok(result)
}
