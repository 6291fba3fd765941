use std::path::PathBuf;

use clap::{Parser, Subcommand};
use pajdeg::{Object, Pipe, Task, TaskResult};

#[derive(Parser)]
#[command(about = "Streaming PDF mutation samples", version)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Stream a PDF through untouched; the cross reference table is rebuilt.
    Passthrough { input: PathBuf, output: PathBuf },
    /// Create a metadata object and point the document Root at it.
    AddMetadata {
        input: PathBuf,
        output: PathBuf,
        #[arg(long, default_value = "Hello World!")]
        text: String,
    },
    /// Replace the stream of the document's existing metadata object.
    ReplaceMetadata {
        input: PathBuf,
        output: PathBuf,
        #[arg(long, default_value = "Hello Again, World!")]
        text: String,
    },
}

fn main() {
    env_logger::init();
    let cli = Cli::parse();
    match run(cli.command) {
        Ok(seen) => println!("{seen} object(s) processed"),
        Err(err) => {
            eprintln!("error: {err}");
            std::process::exit(1);
        }
    }
}

fn run(command: Command) -> pajdeg::Result<usize> {
    match command {
        Command::Passthrough { input, output } => {
            let mut pipe = Pipe::new(input, output)?;
            pipe.execute()
        }
        Command::AddMetadata {
            input,
            output,
            text,
        } => {
            let mut pipe = Pipe::new(input, output)?;

            // the metadata lives in a new object; Root gets a reference
            let meta_id = {
                let parser = pipe.parser()?;
                let meta = parser.create_object()?;
                let mut meta = meta.borrow_mut();
                meta.set_stream(text.into_bytes(), true, false);
                meta.id()
            };

            pipe.add_task(Task::for_root(move |_parser, root| {
                let mut root = root.borrow_mut();
                if root.get_dictionary_entry(b"Metadata").is_some() {
                    log::error!("the document already has a metadata entry");
                    return Ok(TaskResult::Failure);
                }
                root.set_dictionary_entry("Metadata", Object::Reference((meta_id, 0)));
                Ok(TaskResult::Done)
            }))?;

            pipe.execute()
        }
        Command::ReplaceMetadata {
            input,
            output,
            text,
        } => {
            let mut pipe = Pipe::new(input, output)?;

            let meta_ref = {
                let parser = pipe.parser()?;
                let root = parser.root_object()?;
                let reference = root
                    .borrow_mut()
                    .get_dictionary_entry(b"Metadata")
                    .and_then(|o| o.as_reference().ok());
                reference
            };

            let Some((meta_id, _)) = meta_ref else {
                eprintln!("the document has no metadata entry; nothing to replace");
                return Err(pajdeg::Error::ObjectNotFound(0));
            };

            pipe.add_task(Task::for_object(meta_id, move |_parser, object| {
                object
                    .borrow_mut()
                    .set_stream(text.clone().into_bytes(), true, false);
                Ok(TaskResult::Done)
            }))?;

            pipe.execute()
        }
    }
}
