use criterion::{criterion_group, criterion_main, Criterion};

/// A classical text-xref document with `n` content streams.
fn synthetic_pdf(n: usize) -> Vec<u8> {
    let mut out = b"%PDF-1.4\n".to_vec();
    let mut offsets = Vec::new();

    offsets.push(out.len());
    out.extend(b"1 0 obj\n<</Type /Catalog /Pages 2 0 R>>\nendobj\n");
    offsets.push(out.len());
    out.extend(format!("2 0 obj\n<</Type /Pages /Kids [] /Count {n}>>\nendobj\n").bytes());

    for i in 0..n {
        let content = format!("BT /F1 12 Tf (object number {i}) Tj ET");
        offsets.push(out.len());
        out.extend(
            format!(
                "{} 0 obj\n<</Length {}>>\nstream\n{}\nendstream\nendobj\n",
                i + 3,
                content.len(),
                content
            )
            .bytes(),
        );
    }

    let size = offsets.len() + 1;
    let xref_pos = out.len();
    out.extend(format!("xref\n0 {size}\n").bytes());
    out.extend(b"0000000000 65535 f \n");
    for offset in &offsets {
        out.extend(format!("{offset:010} 00000 n \n").bytes());
    }
    out.extend(
        format!("trailer\n<</Size {size} /Root 1 0 R>>\nstartxref\n{xref_pos}\n%%EOF\n").bytes(),
    );
    out
}

fn passthrough(c: &mut Criterion) {
    let input = synthetic_pdf(200);
    let dir = tempfile::tempdir().unwrap();
    let in_path = dir.path().join("bench.pdf");
    let out_path = dir.path().join("bench-out.pdf");
    std::fs::write(&in_path, &input).unwrap();

    c.bench_function("passthrough 200 objects", |b| {
        b.iter(|| {
            let mut pipe = pajdeg::Pipe::new(&in_path, &out_path).unwrap();
            pipe.execute().unwrap()
        })
    });
}

criterion_group!(benches, passthrough);
criterion_main!(benches);
