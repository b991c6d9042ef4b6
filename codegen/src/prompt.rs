//! Prompt construction for the general strategy.

use crate::attachments::DecodedAttachment;

/// Characters of each text-like attachment shown to the backend.
pub const PREVIEW_CHARS: usize = 200;

/// Build the single generation request for `brief`.
pub fn build_prompt(
    brief: &str,
    checks: &[String],
    attachments: &[DecodedAttachment],
    round: u32,
) -> String {
    let attachment_context = attachment_context(attachments);
    let checks_json = serde_json::to_string_pretty(checks).unwrap_or_else(|_| "[]".to_string());

    format!(
        r#"You are an expert web developer. Generate a complete, working web application based on the following requirements.

TASK BRIEF:
{brief}

ROUND: {round}
{attachment_context}

EVALUATION CHECKS:
{checks_json}

CRITICAL INSTRUCTIONS:
1. Read the brief VERY CAREFULLY and identify ALL files that need to be created
2. For each file mentioned in the brief, create it with the EXACT filename specified
3. Generate complete, working code - no placeholders or TODOs
4. For JSON files, ensure valid JSON syntax
5. For HTML files, include proper structure and functionality
6. For SVG files, create valid SVG markup
7. For text files, write complete content as specified
8. If the brief mentions specific IDs or element names, use them EXACTLY
9. If the brief mentions fetching data from APIs, implement the fetch() calls
10. Always create an index.html that links to or displays all other files
11. Always create a professional README.md explaining the project

OUTPUT FORMAT:
Return your response as a JSON object with this structure:
{{
  "files": {{
    "filename1.ext": "content of file 1",
    "filename2.ext": "content of file 2",
    ...
  }}
}}

IMPORTANT:
- The JSON must be valid and parseable
- Include ALL files mentioned in the brief
- File content should be complete and functional
- For multi-line content, use proper JSON string escaping
- Do NOT include markdown code blocks, just return raw JSON

Generate the files now:"#
    )
}

fn attachment_context(attachments: &[DecodedAttachment]) -> String {
    if attachments.is_empty() {
        return String::new();
    }

    let mut context = String::from("\n\nAttachments provided:\n");
    for att in attachments {
        context.push_str(&format!(
            "- {} ({}, {} bytes)\n",
            att.name,
            att.mime,
            att.bytes.len()
        ));
        if att.is_text_like() {
            context.push_str(&format!("  Preview: {}...\n", preview(&att.bytes)));
        }
    }
    context
}

fn preview(bytes: &[u8]) -> String {
    String::from_utf8_lossy(bytes)
        .chars()
        .take(PREVIEW_CHARS)
        .collect()
}
