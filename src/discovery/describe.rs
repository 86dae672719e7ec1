use regex::Regex;
use std::sync::OnceLock;

pub const DEFAULT_DESCRIPTION: &str = "Python application";

/// Module docstring, else the first `#` comment, else a generic label.
pub fn extract_description(content: &str) -> String {
    let mut in_docstring = false;
    let mut doc_lines: Vec<&str> = Vec::new();

    for line in content.lines() {
        let stripped = line.trim();
        if !in_docstring {
            if let Some(rest) = stripped.strip_prefix("\"\"\"") {
                if let Some(single) = rest.strip_suffix("\"\"\"") {
                    let single = single.trim();
                    if !single.is_empty() {
                        return single.to_string();
                    }
                    continue;
                }
                in_docstring = true;
                if !rest.is_empty() {
                    doc_lines.push(rest.trim());
                }
            }
            continue;
        }
        if let Some(last) = stripped.strip_suffix("\"\"\"") {
            if !last.trim().is_empty() {
                doc_lines.push(last.trim());
            }
            break;
        }
        doc_lines.push(stripped);
    }

    let joined = doc_lines
        .iter()
        .filter(|l| !l.is_empty())
        .copied()
        .collect::<Vec<_>>()
        .join(" ");
    if !joined.is_empty() {
        return joined;
    }

    content
        .lines()
        .map(str::trim)
        .filter(|l| l.starts_with('#') && !l.starts_with("#!"))
        .map(|l| l.trim_start_matches('#').trim())
        .find(|l| !l.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| DEFAULT_DESCRIPTION.to_string())
}

fn port_patterns() -> &'static [Regex] {
    static PATTERNS: OnceLock<Vec<Regex>> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        [
            r"(?i)port[=\s]*(\d+)",
            r"(?i)--port[=\s]*(\d+)",
            r"(?i)uvicorn.*:(\d+)",
        ]
        .iter()
        .filter_map(|p| Regex::new(p).ok())
        .collect()
    })
}

/// First port number mentioned in a web entry file.
pub fn extract_port(content: &str) -> Option<u16> {
    port_patterns().iter().find_map(|re| {
        re.captures_iter(content)
            .filter_map(|c| c.get(1))
            .find_map(|m| m.as_str().parse::<u16>().ok())
    })
}

/// Menu-sized description.
pub fn truncate(description: &str, max: usize) -> String {
    if description.chars().count() <= max {
        return description.to_string();
    }
    let head: String = description.chars().take(max).collect();
    format!("{head}...")
}
