//! Shared fixtures: synthetic PDFs assembled with correct offsets, plus
//! output validation helpers.

use std::io::Write;

use pajdeg::{Pipe, Result};

/// Serialize a body with its stream keywords; `/Length` matches the
/// content exactly.
#[allow(dead_code)]
pub fn stream_body(content: &str) -> String {
    format!(
        "<</Length {}>>\nstream\n{}\nendstream",
        content.len(),
        content
    )
}

/// Assemble a classical (text xref) PDF from `(id, body)` pairs. Gaps in
/// the id space become free entries.
#[allow(dead_code)]
pub fn build_pdf(objects: &[(u32, String)], trailer_extra: &str) -> Vec<u8> {
    let mut out = b"%PDF-1.4\n".to_vec();
    let mut offsets = std::collections::BTreeMap::new();

    for (id, body) in objects {
        offsets.insert(*id, out.len());
        out.extend(format!("{id} 0 obj\n{body}\nendobj\n").bytes());
    }

    let size = objects.iter().map(|(id, _)| *id).max().unwrap_or(0) + 1;
    let xref_pos = out.len();
    out.extend(format!("xref\n0 {size}\n").bytes());
    out.extend(b"0000000000 65535 f \n");
    for id in 1..size {
        match offsets.get(&id) {
            Some(offset) => out.extend(format!("{offset:010} 00000 n \n").bytes()),
            None => out.extend(b"0000000000 65535 f \n"),
        }
    }
    out.extend(
        format!("trailer\n<</Size {size}{trailer_extra}>>\nstartxref\n{xref_pos}\n%%EOF\n")
            .bytes(),
    );
    out
}

/// A tiny but complete single page document.
#[allow(dead_code)]
pub fn minimal_doc() -> Vec<(u32, String)> {
    vec![
        (1, "<</Type /Catalog /Pages 2 0 R>>".to_string()),
        (2, "<</Type /Pages /Kids [3 0 R] /Count 1>>".to_string()),
        (
            3,
            "<</Type /Page /Parent 2 0 R /Contents 4 0 R /MediaBox [0 0 595 842]>>".to_string(),
        ),
        (4, stream_body("BT /F1 12 Tf (Hello) Tj ET")),
    ]
}

/// Write `input` to disk, let `configure` register tasks, execute, and
/// return the output bytes.
#[allow(dead_code)]
pub fn run_pipe(input: &[u8], configure: impl FnOnce(&mut Pipe) -> Result<()>) -> Vec<u8> {
    let dir = tempfile::tempdir().unwrap();
    let in_path = dir.path().join("in.pdf");
    let out_path = dir.path().join("out.pdf");
    std::fs::File::create(&in_path)
        .unwrap()
        .write_all(input)
        .unwrap();

    let mut pipe = Pipe::new(&in_path, &out_path).unwrap();
    configure(&mut pipe).unwrap();
    pipe.execute().unwrap();

    std::fs::read(&out_path).unwrap()
}

/// The offset named by the final `startxref`.
#[allow(dead_code)]
pub fn startxref_of(pdf: &[u8]) -> usize {
    let text = String::from_utf8_lossy(pdf);
    let pos = text.rfind("startxref").expect("no startxref in output");
    text[pos + "startxref".len()..]
        .split_whitespace()
        .next()
        .expect("startxref without an offset")
        .parse()
        .expect("startxref offset not numeric")
}

/// Validate a textual cross reference table: every in-use entry must point
/// at the declared object's header.
#[allow(dead_code)]
pub fn assert_text_xref_consistent(pdf: &[u8]) {
    let table_pos = startxref_of(pdf);
    assert!(
        pdf[table_pos..].starts_with(b"xref"),
        "startxref does not point at a cross reference table"
    );

    let text = String::from_utf8_lossy(&pdf[table_pos..]);
    let mut lines = text.lines();
    assert_eq!(lines.next(), Some("xref"));
    let header = lines.next().expect("missing section header");
    let mut parts = header.split_whitespace();
    let first: u32 = parts.next().unwrap().parse().unwrap();
    let count: u32 = parts.next().unwrap().parse().unwrap();
    assert_eq!(first, 0, "rebuilt tables start at object 0");

    for id in 0..count {
        let row = lines.next().expect("truncated table");
        let offset: usize = row[0..10].trim().parse().unwrap();
        let flag = row.as_bytes()[17];
        if flag == b'n' {
            let expect = format!("{id} ");
            assert!(
                pdf[offset..].starts_with(expect.as_bytes()),
                "object {id} is not at its recorded offset {offset}"
            );
        }
    }
}
