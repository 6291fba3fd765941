mod utils;

use pajdeg::{Task, TaskResult};
use utils::*;

#[test]
fn deleted_objects_free_their_entry_and_lose_their_body() {
    let mut objects = minimal_doc();
    objects.push((5, "<</Orphan true>>".to_string()));
    let input = build_pdf(&objects, " /Root 1 0 R");

    let untouched = run_pipe(&input, |_pipe| Ok(()));
    let output = run_pipe(&input, |pipe| {
        pipe.add_task(Task::for_object(5, |_parser, object| {
            object.borrow_mut().delete();
            Ok(TaskResult::Done)
        }))
    });

    let text = String::from_utf8_lossy(&output);
    assert!(!text.contains("5 0 obj"), "deleted body still present");
    assert!(!text.contains("/Orphan"));
    assert!(output.len() < untouched.len());

    // the cross reference entry is free now
    let table_pos = startxref_of(&output);
    let table = String::from_utf8_lossy(&output[table_pos..]);
    let row = table.lines().nth(2 + 5).expect("table too short");
    assert_eq!(row.as_bytes()[17], b'f', "entry 5 should be free");

    assert_text_xref_consistent(&output);
}

#[test]
fn appended_objects_land_after_the_last_input_object() {
    let input = build_pdf(&minimal_doc(), " /Root 1 0 R");

    let mut new_id = 0;
    let output = run_pipe(&input, |pipe| {
        let parser = pipe.parser()?;
        let appended = parser.create_appended_object()?;
        let mut ob = appended.borrow_mut();
        ob.set_dictionary_entry("Kind", pajdeg::Object::Name(b"Note".to_vec()));
        ob.set_stream(b"appended content".to_vec(), true, false);
        new_id = ob.id();
        Ok(())
    });

    let text = String::from_utf8_lossy(&output);
    let body_pos = text
        .find(&format!("{new_id} 0 obj"))
        .expect("appended object missing");
    let last_original = text.find("4 0 obj").expect("original object missing");
    assert!(
        body_pos > last_original,
        "appended object must come after the input objects"
    );
    assert!(text.contains("stream\nappended content\nendstream"));
    assert_text_xref_consistent(&output);

    // the output parses as a standalone document
    run_pipe(&output, |_pipe| Ok(()));
}

#[test]
fn unloading_tasks_removes_them_from_the_chain() {
    let input = build_pdf(&minimal_doc(), " /Root 1 0 R");

    use std::cell::Cell;
    use std::rc::Rc;
    let count = Rc::new(Cell::new(0));
    let seen = count.clone();

    run_pipe(&input, |pipe| {
        pipe.add_task(Task::unfiltered(move |_parser, _object| {
            seen.set(seen.get() + 1);
            Ok(TaskResult::Unload)
        }))
    });

    assert_eq!(count.get(), 1, "unloaded task ran more than once");
}
