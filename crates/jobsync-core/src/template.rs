//! Job template rendering.
//!
//! Templates are Jenkins `config.xml` documents with `{{.Field}}`
//! placeholders. Substituted values are XML-escaped.

use std::sync::LazyLock;

use quick_xml::escape::escape;
use regex::Regex;

use crate::error::TemplateError;
use crate::job::JobModel;

/// `{{.FieldName}}`, whitespace allowed inside the braces.
// Allow expect here as the regex is compile-time verified to be valid
#[allow(clippy::expect_used)]
static FIELD_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\{\{\s*\.([A-Za-z_][A-Za-z0-9_]*)\s*\}\}").expect("constant regex pattern is valid")
});

/// Render `template` with the values of `model`.
///
/// Unknown fields and dangling `{{` are errors; the caller drops that one job.
pub fn render(template: &str, model: &JobModel) -> Result<String, TemplateError> {
    let mut out = String::with_capacity(template.len());
    let mut last = 0;

    for caps in FIELD_PATTERN.captures_iter(template) {
        let (Some(whole), Some(name)) = (caps.get(0), caps.get(1)) else {
            continue;
        };
        let literal = &template[last..whole.start()];
        check_literal(literal, last)?;
        out.push_str(literal);

        let value = model
            .field(name.as_str())
            .ok_or_else(|| TemplateError::UnknownField {
                field: name.as_str().to_string(),
            })?;
        out.push_str(&escape(value));
        last = whole.end();
    }

    let tail = &template[last..];
    check_literal(tail, last)?;
    out.push_str(tail);
    Ok(out)
}

fn check_literal(literal: &str, base: usize) -> Result<(), TemplateError> {
    match literal.find("{{") {
        Some(offset) => Err(TemplateError::Unterminated {
            offset: base + offset,
        }),
        None => Ok(()),
    }
}
