use flame::Span;
use std::fs::File;
use std::io;
use std::path::Path;

/// Writes every recorded span as an html flame graph.
///
/// Spans with the same name under the same parent are merged so the controller cycles stack
/// into a single bar per phase.
pub fn write_flame<P: AsRef<Path>>(path: P) -> io::Result<()> {
    let mut spans: Vec<Span> = flame::threads()
        .into_iter()
        .flat_map(|thread| thread.spans)
        .collect();
    merge_spans(&mut spans);
    flame::dump_html_custom(&mut File::create(path)?, &spans)
}

fn merge_spans(spans: &mut Vec<Span>) {
    let mut merged: Vec<Span> = Vec::new();
    for span in spans.drain(..) {
        match merged.iter().position(|m| m.name == span.name) {
            Some(i) => {
                let target = &mut merged[i];
                target.delta += span.delta;
                target.children.extend(span.children);
            }
            None => merged.push(span),
        }
    }

    for span in &mut merged {
        merge_spans(&mut span.children);
    }
    *spans = merged;
}
