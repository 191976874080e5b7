use std::fs;
use std::io;
use std::path::Path;

/// Builds the autoindex page for `dir`, linking each entry under `uri`.
///
/// Entries are sorted by name; `.` and `..` are never listed.
pub fn render(dir: &Path, uri: &str) -> io::Result<String> {
    let mut names: Vec<String> = fs::read_dir(dir)?
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.file_name().to_string_lossy().into_owned())
        .filter(|name| name != "." && name != "..")
        .collect();
    names.sort();
    names.dedup();

    let base = escape(uri.trim_end_matches('/'));
    let mut html = format!(
        "<!DOCTYPE html>\n<html>\n<head><title>Index of {0}</title></head>\n<body>\n<h1>Index of {0}</h1>\n<hr>\n<ul>\n",
        if uri.is_empty() { "/".to_string() } else { escape(uri) }
    );
    for name in &names {
        let suffix = if dir.join(name).is_dir() { "/" } else { "" };
        let name_html = escape(name);
        html.push_str(&format!("<li><a href=\"{}/{}\">{}{}</a></li>\n", base, name_html, name_html, suffix));
    }
    html.push_str("</ul>\n<hr>\n</body>\n</html>\n");
    Ok(html)
}

fn escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            _ => out.push(c),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn lists_every_entry_once_sorted() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("b.txt"), "").unwrap();
        fs::write(dir.path().join("a.txt"), "").unwrap();
        fs::create_dir(dir.path().join("sub")).unwrap();

        let html = render(dir.path(), "/files").unwrap();
        assert_eq!(html.matches("<li>").count(), 3);
        assert!(html.contains("<a href=\"/files/a.txt\">a.txt</a>"));
        assert!(html.contains("<a href=\"/files/sub\">sub/</a>"));
        assert!(html.find("a.txt").unwrap() < html.find("b.txt").unwrap());
        assert!(!html.contains("href=\"/files/.\""));
        assert!(!html.contains("href=\"/files/..\""));
    }

    #[test]
    fn root_uri_links_without_double_slash() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("x"), "").unwrap();
        let html = render(dir.path(), "/").unwrap();
        assert!(html.contains("<a href=\"/x\">x</a>"));
    }

    #[test]
    fn markup_in_names_is_escaped() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("\"><script>x&y"), "").unwrap();

        let html = render(dir.path(), "/up").unwrap();
        assert!(!html.contains("<script>"));
        assert!(html.contains("<a href=\"/up/&quot;&gt;&lt;script&gt;x&amp;y\">&quot;&gt;&lt;script&gt;x&amp;y</a>"));
    }

    #[test]
    fn missing_directory_is_an_error() {
        let dir = TempDir::new().unwrap();
        assert!(render(&dir.path().join("nope"), "/nope").is_err());
    }
}
