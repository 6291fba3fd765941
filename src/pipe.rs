//! The pipe: owner of the parser and the twin stream, dispatcher of tasks.

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::fs::File;
use std::mem;
use std::path::{Path, PathBuf};
use std::rc::Rc;

use log::info;

use crate::error::{Error, Result};
use crate::object_stream::ObjectStreamView;
use crate::parser::Parser;
use crate::task::{self, Task, TaskResult, TaskTarget, TaskUnit};
use crate::twin_stream::TwinStream;

pub struct Pipe {
    input: PathBuf,
    output: PathBuf,
    parser: Option<Parser>,
    /// Filtered task chains, keyed by object id.
    filters: BTreeMap<u32, Vec<TaskUnit>>,
    /// Chains for objects living inside object streams, keyed by the
    /// containing object's id.
    obstm_filters: BTreeMap<u32, Vec<(u32, Vec<TaskUnit>)>>,
    /// Tasks run on every iterated object.
    unfiltered: Vec<TaskUnit>,
}

impl Pipe {
    /// Set up a pipe between two paths. The files are opened lazily; input
    /// readability is verified here.
    pub fn new<P: AsRef<Path>, Q: AsRef<Path>>(input: P, output: Q) -> Result<Pipe> {
        let input = input.as_ref().to_path_buf();
        let output = output.as_ref().to_path_buf();
        if input == output {
            return Err(Error::Syntax(
                "input and output must be different files".into(),
            ));
        }
        drop(File::open(&input)?);
        Ok(Pipe {
            input,
            output,
            parser: None,
            filters: BTreeMap::new(),
            obstm_filters: BTreeMap::new(),
            unfiltered: Vec::new(),
        })
    }

    /// Open the files and construct the twin stream and parser. Called
    /// automatically by everything that needs them.
    pub fn prepare(&mut self) -> Result<()> {
        if self.parser.is_some() {
            return Ok(());
        }
        let input = File::open(&self.input)?;
        let output = File::create(&self.output)?;
        let stream = TwinStream::new(input, output)?;
        self.parser = Some(Parser::new(stream)?);
        Ok(())
    }

    /// The pipe's parser, preparing the pipe if needed.
    pub fn parser(&mut self) -> Result<&mut Parser> {
        self.prepare()?;
        Ok(self.parser.as_mut().expect("prepared above"))
    }

    /// Register a task. Filtered tasks must be added before the parser has
    /// written past their object.
    pub fn add_task(&mut self, task: Task) -> Result<()> {
        let key = match task.target {
            TaskTarget::Everything => {
                self.unfiltered.extend(task.units);
                return Ok(());
            }
            TaskTarget::Object(id) => id,
            TaskTarget::Root => {
                let (id, _) = self
                    .parser()?
                    .root_reference()
                    .ok_or(Error::ObjectNotFound(0))?;
                id
            }
            TaskTarget::Info => {
                let (id, _) = self
                    .parser()?
                    .info_reference()
                    .ok_or(Error::ObjectNotFound(0))?;
                id
            }
        };

        let parser = self.parser()?;

        // an object inside an object stream is reached through its
        // container
        if let Some(container) = parser.container_of(key) {
            if !parser.is_object_still_mutable(container) {
                return Err(Error::ObjectAlreadyWritten(key));
            }
            self.obstm_filters
                .entry(container)
                .or_default()
                .push((key, task.units));
            return Ok(());
        }

        if !parser.is_object_still_mutable(key) {
            return Err(Error::ObjectAlreadyWritten(key));
        }
        match self.filters.entry(key) {
            std::collections::btree_map::Entry::Occupied(mut existing) => {
                // same filter; merge the chains
                existing.get_mut().extend(task.units);
            }
            std::collections::btree_map::Entry::Vacant(slot) => {
                slot.insert(task.units);
            }
        }
        Ok(())
    }

    /// Stream the input to the output, dispatching tasks along the way.
    /// Returns the number of objects iterated.
    pub fn execute(&mut self) -> Result<usize> {
        self.prepare()?;
        let mut parser = self.parser.take().expect("prepared above");
        let mut seen = 0usize;

        loop {
            seen += 1;

            if parser.has_current_object() {
                if !self.unfiltered.is_empty() {
                    let object = parser.construct_object()?;
                    let mut units = mem::take(&mut self.unfiltered);
                    let outcome = task::exec_chain(&mut units, &mut parser, &object);
                    self.unfiltered = units;
                    if outcome? == TaskResult::Failure {
                        return Err(Error::TaskFailed);
                    }
                }

                let obid = parser.current_object_id();

                if let Some(mut units) = self.filters.remove(&obid) {
                    let object = parser.construct_object()?;
                    let outcome = task::exec_chain(&mut units, &mut parser, &object);
                    self.filters.insert(obid, units);
                    if outcome? == TaskResult::Failure {
                        return Err(Error::TaskFailed);
                    }
                }

                if let Some(mut children) = self.obstm_filters.remove(&obid) {
                    let outcome = mutate_object_stream(&mut parser, &mut children);
                    self.obstm_filters.insert(obid, children);
                    outcome?;
                }
            }

            if !parser.iterate()? {
                break;
            }
        }

        parser.finish()?;
        info!("pipe finished; {seen} object(s) iterated");
        Ok(seen)
    }
}

/// The synthetic mutator installed on an object stream container:
/// materialize the stream, run the registered chains against the embedded
/// objects, and commit the re-encoded stream.
fn mutate_object_stream(
    parser: &mut Parser,
    children: &mut Vec<(u32, Vec<TaskUnit>)>,
) -> Result<()> {
    let container = parser.construct_object()?;
    let data = parser.fetch_current_object_stream()?;

    let mut view = ObjectStreamView::from_object(&mut container.borrow_mut())?;
    view.parse(&data)?;

    for (id, units) in children.iter_mut() {
        let object: Rc<RefCell<_>> = view
            .object_by_id(*id)
            .ok_or(Error::ObjectNotFound(*id))?;
        if task::exec_chain(units, parser, &object)? == TaskResult::Failure {
            return Err(Error::TaskFailed);
        }
    }

    view.commit(&mut container.borrow_mut())
}
