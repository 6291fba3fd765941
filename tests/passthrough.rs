mod utils;

use utils::*;

#[test]
fn passthrough_keeps_every_object_and_rebuilds_the_table() {
    let input = build_pdf(&minimal_doc(), " /Root 1 0 R");
    let output = run_pipe(&input, |_pipe| Ok(()));

    let text = String::from_utf8_lossy(&output);
    for header in ["1 0 obj", "2 0 obj", "3 0 obj", "4 0 obj"] {
        assert!(text.contains(header), "missing {header}");
    }
    assert!(text.contains("(Hello) Tj"));
    assert!(text.contains("/Root 1 0 R"));
    assert!(text.ends_with("%%EOF\n"));
    assert_text_xref_consistent(&output);
}

#[test]
fn passthrough_output_is_itself_pipeable() {
    let input = build_pdf(&minimal_doc(), " /Root 1 0 R");
    let once = run_pipe(&input, |_pipe| Ok(()));
    let twice = run_pipe(&once, |_pipe| Ok(()));
    assert_text_xref_consistent(&twice);
}

#[test]
fn header_comment_passes_through_verbatim() {
    let input = build_pdf(&minimal_doc(), " /Root 1 0 R");
    let output = run_pipe(&input, |_pipe| Ok(()));
    assert!(output.starts_with(b"%PDF-1.4\n"));
}

#[test]
fn bare_trailer_document_round_trips() {
    let input =
        b"%PDF-1.4\nxref\n0 1\n0000000000 65535 f \ntrailer\n<</Size 1>>\nstartxref\n9\n%%EOF\n";
    let output = run_pipe(input, |_pipe| Ok(()));
    let text = String::from_utf8_lossy(&output);
    assert!(text.starts_with("%PDF-1.4\n"));
    assert!(text.contains("xref\n0 1\n0000000000 65535 f \n"));
    assert!(text.contains("trailer"));
    assert!(text.ends_with("%%EOF\n"));
}

#[test]
fn stream_length_behind_a_reference_is_resolved() {
    let content = "BT (indirect length) Tj ET";
    let mut objects = minimal_doc();
    objects[3] = (
        4,
        format!("<</Length 5 0 R>>\nstream\n{content}\nendstream"),
    );
    objects.push((5, format!("{}", content.len())));

    let input = build_pdf(&objects, " /Root 1 0 R");
    let output = run_pipe(&input, |_pipe| Ok(()));
    let text = String::from_utf8_lossy(&output);
    assert!(text.contains("(indirect length) Tj"));
    assert_text_xref_consistent(&output);
}

#[test]
fn superseding_revisions_keep_the_newest_object() {
    // first revision
    let mut pdf = build_pdf(&minimal_doc(), " /Root 1 0 R");

    // incremental update: object 2 gains a second (empty) kid array entry
    let update_offset = pdf.len();
    let body = "<</Type /Pages /Kids [3 0 R] /Count 1 /Updated true>>";
    pdf.extend(format!("2 0 obj\n{body}\nendobj\n").bytes());
    let xref_pos = pdf.len();
    pdf.extend(
        format!(
            "xref\n0 1\n0000000000 65535 f \n2 1\n{update_offset:010} 00000 n \ntrailer\n<</Size 5 /Root 1 0 R /Prev {prev}>>\nstartxref\n{xref_pos}\n%%EOF\n",
            prev = startxref_of(&build_pdf(&minimal_doc(), " /Root 1 0 R")),
        )
        .bytes(),
    );

    let output = run_pipe(&pdf, |_pipe| Ok(()));
    let text = String::from_utf8_lossy(&output);
    assert!(text.contains("/Updated true"), "new revision lost");
    assert_eq!(
        text.matches("2 0 obj").count(),
        1,
        "the superseded copy must not be emitted"
    );
    assert_text_xref_consistent(&output);
}

#[test]
fn no_op_mutators_are_idempotent() {
    use pajdeg::{IndirectObject, Parser, Task, TaskResult};
    use std::cell::RefCell;
    use std::rc::Rc;

    fn noop(_: &mut Parser, _: &Rc<RefCell<IndirectObject>>) -> pajdeg::Result<TaskResult> {
        Ok(TaskResult::Done)
    }

    let input = build_pdf(&minimal_doc(), " /Root 1 0 R");

    let once = run_pipe(&input, |pipe| pipe.add_task(Task::for_object(3, noop)));
    let twice = run_pipe(&input, |pipe| {
        pipe.add_task(Task::for_object(3, noop))?;
        pipe.add_task(Task::for_object(3, noop))
    });
    assert_eq!(once, twice);
}
