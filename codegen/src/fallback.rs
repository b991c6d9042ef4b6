//! Deterministic fallback files, used when the backend is unavailable or its
//! output cannot be parsed.

use crate::files::GeneratedFileSet;

/// A minimal landing page plus README describing the brief and checks.
pub fn generate(brief: &str, checks: &[String]) -> GeneratedFileSet {
    let mut files = GeneratedFileSet::new();
    files.insert("index.html", index_html(brief, checks));
    files.insert("README.md", readme(brief, checks));
    files
}

fn index_html(brief: &str, checks: &[String]) -> String {
    let items: String = checks
        .iter()
        .map(|check| format!("<li>{}</li>", escape_html(check)))
        .collect();
    let brief = escape_html(brief);

    format!(
        r#"<!DOCTYPE html>
<html lang="en">
<head>
    <meta charset="UTF-8">
    <meta name="viewport" content="width=device-width, initial-scale=1.0">
    <title>Task Application</title>
    <style>
        body {{
            font-family: Arial, sans-serif;
            max-width: 800px;
            margin: 50px auto;
            padding: 20px;
            background: #f5f5f5;
        }}
        .container {{
            background: white;
            padding: 30px;
            border-radius: 10px;
            box-shadow: 0 2px 10px rgba(0,0,0,0.1);
        }}
        h1 {{ color: #333; }}
        .brief {{
            background: #f0f0f0;
            padding: 15px;
            border-radius: 5px;
            margin: 20px 0;
        }}
    </style>
</head>
<body>
    <div class="container">
        <h1>Task Application</h1>
        <div class="brief">
            <h2>Brief:</h2>
            <p>{brief}</p>
        </div>
        <h2>Checks:</h2>
        <ul>
            {items}
        </ul>
    </div>
</body>
</html>"#
    )
}

fn readme(brief: &str, checks: &[String]) -> String {
    let checks: Vec<String> = checks.iter().map(|c| format!("- {c}")).collect();
    format!(
        "# Task Application

## Brief
{brief}

## Checks
{}

## Setup
Open `index.html` in a web browser.

## Files
- index.html: Main application page
- README.md: This file
",
        checks.join("\n")
    )
}

fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for ch in text.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(ch),
        }
    }
    out
}
