mod utils;

use pajdeg::{Object, Task, TaskResult};
use utils::*;

/// Like `minimal_doc`, but with the catalog written last: creating a new
/// object writes the file's first object out, so the Root must still lie
/// ahead for its task to take effect.
fn doc_with_catalog_last() -> Vec<(u32, String)> {
    let mut objects = minimal_doc();
    let catalog = objects.remove(0);
    objects.push(catalog);
    objects
}

#[test]
fn add_metadata_creates_an_object_and_links_root() {
    let input = build_pdf(&doc_with_catalog_last(), " /Root 1 0 R");

    let mut created_id = 0;
    let output = run_pipe(&input, |pipe| {
        let meta_id = {
            let parser = pipe.parser()?;
            let meta = parser.create_object()?;
            let mut meta = meta.borrow_mut();
            meta.set_stream(b"Hello World!".to_vec(), true, false);
            meta.id()
        };
        created_id = meta_id;

        pipe.add_task(Task::for_root(move |_parser, root| {
            let mut root = root.borrow_mut();
            assert!(root.get_dictionary_entry(b"Metadata").is_none());
            root.set_dictionary_entry("Metadata", Object::Reference((meta_id, 0)));
            Ok(TaskResult::Done)
        }))
    });

    let text = String::from_utf8_lossy(&output);
    assert!(text.contains(&format!("/Metadata {created_id} 0 R")));
    assert!(text.contains(&format!("{created_id} 0 obj")));
    assert!(text.contains("stream\nHello World!\nendstream"));
    assert!(text.contains("/Length 12"));
    assert_text_xref_consistent(&output);
}

#[test]
fn replace_metadata_rewrites_the_referenced_stream() {
    let mut objects = minimal_doc();
    objects.push((5, stream_body("old metadata bytes")));
    objects[0] = (1, "<</Type /Catalog /Pages 2 0 R /Metadata 5 0 R>>".to_string());
    let input = build_pdf(&objects, " /Root 1 0 R");

    let output = run_pipe(&input, |pipe| {
        let meta_ref = {
            let parser = pipe.parser()?;
            let root = parser.root_object()?;
            let reference = root
                .borrow_mut()
                .get_dictionary_entry(b"Metadata")
                .and_then(|o| o.as_reference().ok());
            reference
        };
        let (meta_id, _) = meta_ref.expect("fixture Root carries /Metadata");
        assert_eq!(meta_id, 5);

        pipe.add_task(Task::for_object(meta_id, |_parser, object| {
            object
                .borrow_mut()
                .set_stream(b"Hello Again, World!".to_vec(), true, false);
            Ok(TaskResult::Done)
        }))
    });

    let text = String::from_utf8_lossy(&output);
    // the Root keeps pointing at the same object
    assert!(text.contains("/Metadata 5 0 R"));
    assert!(text.contains("stream\nHello Again, World!\nendstream"));
    assert!(text.contains("/Length 19"));
    assert!(!text.contains("old metadata bytes"));
    assert_text_xref_consistent(&output);
}

#[test]
fn late_registration_for_a_written_object_is_refused() {
    let input = build_pdf(&minimal_doc(), " /Root 1 0 R");

    let dir = tempfile::tempdir().unwrap();
    let in_path = dir.path().join("in.pdf");
    let out_path = dir.path().join("out.pdf");
    std::fs::write(&in_path, &input).unwrap();

    let mut pipe = pajdeg::Pipe::new(&in_path, &out_path).unwrap();
    pipe.execute().unwrap();

    // the pipe is closed; re-registering reopens it, but an id beyond the
    // table is refused outright
    let result = pipe.add_task(Task::for_object(
        9999,
        |_parser, _object| Ok(TaskResult::Done),
    ));
    assert!(matches!(
        result,
        Err(pajdeg::Error::ObjectAlreadyWritten(9999))
    ));
}
