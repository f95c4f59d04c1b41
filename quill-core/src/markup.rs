//! Rich-text tree to HTML-like markup.
//!
//! Node and mark names follow the editor's schema (`paragraph`, `heading`,
//! `bulletList`, `bold`, ...). Marks on a text run are emitted in name order
//! so the output is stable regardless of attribute map ordering.

use yrs::types::text::YChange;
use yrs::types::Attrs;
use yrs::{Any, Out, ReadTxn, Text, Xml, XmlElementRef, XmlFragment, XmlFragmentRef, XmlOut, XmlTextRef};

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum MarkupError {
    #[error("no markup for node `{0}`")]
    UnknownTag(String),
    #[error("no markup for mark `{0}`")]
    UnknownMark(String),
}

pub fn render_fragment<T: ReadTxn>(fragment: &XmlFragmentRef, txn: &T) -> Result<String, MarkupError> {
    let mut out = String::new();
    render_children(fragment, txn, &mut out)?;
    Ok(out)
}

pub fn render_element<T: ReadTxn>(element: &XmlElementRef, txn: &T) -> Result<String, MarkupError> {
    let mut out = String::new();
    write_element(element, txn, &mut out)?;
    Ok(out)
}

fn render_children<F: XmlFragment, T: ReadTxn>(node: &F, txn: &T, out: &mut String) -> Result<(), MarkupError> {
    for index in 0..node.len(txn) {
        match node.get(txn, index) {
            Some(XmlOut::Element(element)) => write_element(&element, txn, out)?,
            Some(XmlOut::Text(text)) => write_text(&text, txn, out)?,
            Some(XmlOut::Fragment(fragment)) => render_children(&fragment, txn, out)?,
            None => {}
        }
    }
    Ok(())
}

fn write_element<T: ReadTxn>(element: &XmlElementRef, txn: &T, out: &mut String) -> Result<(), MarkupError> {
    let tag = element.tag().to_string();
    let html = match tag.as_str() {
        "paragraph" => "p".to_string(),
        "heading" | "header" => format!("h{}", heading_level(element, txn)),
        "blockquote" => "blockquote".to_string(),
        "bulletList" => "ul".to_string(),
        "orderedList" => "ol".to_string(),
        "listItem" => "li".to_string(),
        "table" => "table".to_string(),
        "tableRow" => "tr".to_string(),
        "tableCell" => "td".to_string(),
        "tableHeader" => "th".to_string(),
        "codeBlock" => {
            out.push_str("<pre><code>");
            render_children(element, txn, out)?;
            out.push_str("</code></pre>");
            return Ok(());
        }
        "hardBreak" => {
            out.push_str("<br>");
            return Ok(());
        }
        _ => return Err(MarkupError::UnknownTag(tag)),
    };
    out.push('<');
    out.push_str(&html);
    out.push('>');
    render_children(element, txn, out)?;
    out.push_str("</");
    out.push_str(&html);
    out.push('>');
    Ok(())
}

fn heading_level<T: ReadTxn>(element: &XmlElementRef, txn: &T) -> u8 {
    let level = match element.get_attribute(txn, "level") {
        Some(Out::Any(Any::Number(n))) => n as i64,
        Some(Out::Any(Any::BigInt(n))) => n,
        Some(Out::Any(Any::String(s))) => s.parse().unwrap_or(1),
        _ => 1,
    };
    level.clamp(1, 6) as u8
}

fn write_text<T: ReadTxn>(text: &XmlTextRef, txn: &T, out: &mut String) -> Result<(), MarkupError> {
    for chunk in text.diff(txn, YChange::identity) {
        let Out::Any(Any::String(content)) = &chunk.insert else {
            continue;
        };
        let marks = sorted_marks(chunk.attributes.as_deref())?;
        for (_, open, _) in &marks {
            out.push_str(open);
        }
        escape_into(content, out);
        for (_, _, close) in marks.iter().rev() {
            out.push_str(close);
        }
    }
    Ok(())
}

type Mark = (String, String, &'static str);

fn sorted_marks(attrs: Option<&Attrs>) -> Result<Vec<Mark>, MarkupError> {
    let Some(attrs) = attrs else {
        return Ok(Vec::new());
    };
    let mut marks = Vec::with_capacity(attrs.len());
    for (name, value) in attrs.iter() {
        if matches!(value, Any::Null | Any::Undefined | Any::Bool(false)) {
            continue;
        }
        let (open, close) = match name.as_ref() {
            "bold" => ("<strong>".to_string(), "</strong>"),
            "italic" => ("<em>".to_string(), "</em>"),
            "underline" => ("<u>".to_string(), "</u>"),
            "strike" => ("<s>".to_string(), "</s>"),
            "code" => ("<code>".to_string(), "</code>"),
            "link" => (format!("<a href=\"{}\">", link_href(value)), "</a>"),
            other => return Err(MarkupError::UnknownMark(other.to_string())),
        };
        marks.push((name.to_string(), open, close));
    }
    marks.sort_by(|a, b| a.0.cmp(&b.0));
    Ok(marks)
}

fn link_href(value: &Any) -> String {
    let href = match value {
        Any::Map(entries) => match entries.get("href") {
            Some(Any::String(href)) => href.to_string(),
            _ => String::new(),
        },
        Any::String(href) => href.to_string(),
        _ => String::new(),
    };
    let mut escaped = String::with_capacity(href.len());
    escape_into(&href, &mut escaped);
    escaped
}

fn escape_into(raw: &str, out: &mut String) {
    for c in raw.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            c => out.push(c),
        }
    }
}
