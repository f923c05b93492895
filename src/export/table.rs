use crate::annotate::AnnotatedTree;

/// One row per tip: the tip name, its attributes and whether it matched.
pub fn render(annotated: &AnnotatedTree, sep: char) -> String {
    let mut out = String::new();

    let mut header = vec!["tip".to_string()];
    header.extend(annotated.columns.iter().cloned());
    header.push("matched".to_string());
    push_row(&mut out, &header, sep);

    for tip in &annotated.tips {
        let mut row = Vec::with_capacity(annotated.columns.len() + 2);
        row.push(tip.display_name());
        match &tip.attributes {
            Some(values) => row.extend(values.iter().cloned()),
            None => row.resize(annotated.columns.len() + 1, String::new()),
        }
        row.push(if tip.is_matched() { "yes" } else { "no" }.to_string());
        push_row(&mut out, &row, sep);
    }

    out
}

fn push_row(out: &mut String, fields: &[String], sep: char) {
    for (i, field) in fields.iter().enumerate() {
        if i > 0 {
            out.push(sep);
        }
        out.push_str(&escape(field, sep));
    }
    out.push('\n');
}

fn escape(field: &str, sep: char) -> String {
    if field.contains(sep) || field.contains('"') || field.contains('\n') {
        format!("\"{}\"", field.replace('"', "\"\""))
    } else {
        field.to_string()
    }
}
