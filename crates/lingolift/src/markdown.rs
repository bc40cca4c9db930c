//! A small markdown renderer for terminals.
//!
//! Only the subset the tutor produces is understood: `##` and `###`
//! headers, `-`/`*` bullets, numbered items and `**bold**` spans. Anything
//! else is printed as is.

use std::sync::LazyLock;

use owo_colors::OwoColorize;
use regex::Regex;

static BOLD: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\*\*(.*?)\*\*").expect("valid pattern"));
static BULLET: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[-*]\s+").expect("valid pattern"));
static NUMBERED: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(\d+)\.\s+").expect("valid pattern"));

/// Renders `text` with ANSI styles, line by line.
pub fn render(text: &str) -> String {
    text.split('\n').map(render_line).collect::<Vec<_>>().join("\n")
}

fn render_line(line: &str) -> String {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return String::new();
    }

    if let Some(header) = trimmed.strip_prefix("### ") {
        return render_inline(header.trim_start()).bold().to_string();
    }
    if let Some(header) = trimmed.strip_prefix("## ") {
        return render_inline(header.trim_start())
            .bold()
            .underline()
            .to_string();
    }

    if let Some(marker) = BULLET.find(trimmed) {
        let item = render_inline(&trimmed[marker.end()..]);
        return format!("  {} {item}", "●".bright_cyan());
    }
    if let Some(caps) = NUMBERED.captures(trimmed) {
        let item = render_inline(&trimmed[caps[0].len()..]);
        let number = format!("{}.", &caps[1]);
        return format!(" {} {item}", number.cyan());
    }

    render_inline(line)
}

fn render_inline(text: &str) -> String {
    let mut rendered = String::with_capacity(text.len());
    let mut last = 0;
    for caps in BOLD.captures_iter(text) {
        let Some(span) = caps.get(0) else {
            continue;
        };
        push_plain(&mut rendered, &text[last..span.start()]);
        push_bold(&mut rendered, &caps[1]);
        last = span.end();
    }
    push_plain(&mut rendered, &text[last..]);
    rendered
}

fn push_plain(rendered: &mut String, part: &str) {
    // Markers the pattern cannot pair, like a lone `**`, still wrap the
    // part in an empty bold span.
    if part.len() >= 2 && part.starts_with("**") && part.ends_with("**") {
        let inner = part.get(2..part.len() - 2).unwrap_or_default();
        push_bold(rendered, inner);
    } else {
        rendered.push_str(part);
    }
}

fn push_bold(rendered: &mut String, inner: &str) {
    rendered.push_str(&inner.bold().bright_cyan().to_string());
}
