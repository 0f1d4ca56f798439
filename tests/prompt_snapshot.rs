use doc_translator_rust::adapters::{FormatAdapter, MarkdownAdapter};
use doc_translator_rust::prompts::render_system_prompt;

#[test]
fn system_prompt_snapshot() {
    let prompt = render_system_prompt("ja", "zh", Some("Keep citations.")).expect("prompt");
    insta::assert_snapshot!(prompt, @r"
    You are a professional document translator.
    Translate the user's text from Japanese into Chinese.
    Preserve the meaning, tone and formatting of the original.
    Return only the translated text, without explanations, notes or surrounding quotes.
    Keep numbers, URLs, e-mail addresses, placeholders and code unchanged.
    If the text is already in Chinese, return it as is.

    Domain guidance: Keep citations.
    ");
}

#[test]
fn markdown_preview_snapshot() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("guide.md");
    std::fs::write(&path, "# Title\n\nBody.\n").expect("write");
    let preview = MarkdownAdapter.extract_preview(&path, 100).expect("preview");
    insta::assert_json_snapshot!(preview, @r##"
    {
      "content": [
        {
          "index": 0,
          "type": "heading",
          "text": "Title",
          "location": {
            "kind": "lines",
            "start": 1,
            "end": 1
          },
          "prefix": "# "
        },
        {
          "index": 1,
          "type": "paragraph",
          "text": "Body.",
          "location": {
            "kind": "lines",
            "start": 3,
            "end": 3
          }
        }
      ],
      "totalChars": 10,
      "truncated": false
    }
    "##);
}
