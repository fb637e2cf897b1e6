//! Prompts the built-in tools depend on

use super::{Prompt, PromptConfig, PromptMessage};

pub const APPLY_UPDATES: &str = "Apply Updates";
pub const CODE_ARTIFACT: &str = "Code Artifact";
pub const CONVERSATION_SUMMARY: &str = "Conversation Summary";
pub const WRITE_ARTICLE: &str = "Write an article about this";

const APPLY_UPDATES_TEMPLATE: &str = r#"You are a Markdown document update engine.

The document is split into blocks. Each block starts with a comment like
<!-- block_id=... flavour=... --> followed by its content.

<code>
{{content}}
</code>

<op>
{{op}}
</op>

<updates>
{{updates}}
</updates>

Apply <updates> to the document in <code> with the intent described in <op>.
An update may replace a block (same block_id, new content), delete blocks
marked with <!-- delete block_id=... -->, or insert blocks with a new block_id.
Keep every block_id and flavour comment and the original block order.
Leave unrelated blocks untouched.
Output only the full updated Markdown, without code fences."#;

const CONVERSATION_SUMMARY_SYSTEM: &str = "You are an expert conversation summarizer. \
Distill long dialogues into compact summaries that keep every key decision, fact and open question. \
Honor the requested focus. Brief means 1-2 sentences, detailed about 5 sentences or a short list, \
comprehensive full paragraphs. Write neutral third-person prose, add nothing new and return only the summary text.";

const CONVERSATION_SUMMARY_TEMPLATE: &str = "Summarize the conversation below so it can be carried forward without loss.

Focus: {{focus|general}}
Desired length: {{length|detailed}}

Conversation:
{{conversation}}";

const CODE_ARTIFACT_SYSTEM: &str = "When sent new notes, respond ONLY with the contents of a single HTML file. \
Do not include explanations or any text outside the file. \
Style it with tailwindcss, put extra CSS in a style tag and JavaScript in a script tag, \
import dependencies from unpkg or skypack, fonts from Google fonts and icons from lucide. \
Do not use colors or gradients unless the notes ask for them.";

const WRITE_ARTICLE_SYSTEM: &str = "You are an expert article writer. \
From the content or topic the user provides, write a well-structured article in Markdown, \
in the same language as the input. Start with an engaging title and a one-paragraph introduction, \
develop at least three key points supported by the given material, and close with a conclusion. \
Do not invent sources or citations.";

/// The default set, each bound to a model one of the adapters serves
pub fn builtin_prompts() -> Vec<Prompt> {
    vec![
        Prompt::new(
            APPLY_UPDATES,
            "morph-v3-large",
            vec![PromptMessage::user(APPLY_UPDATES_TEMPLATE)],
        ),
        Prompt::new(
            CODE_ARTIFACT,
            "claude-sonnet-4-20250514",
            vec![
                PromptMessage::system(CODE_ARTIFACT_SYSTEM),
                PromptMessage::user("{{content}}"),
            ],
        ),
        Prompt::new(
            CONVERSATION_SUMMARY,
            "gpt-4.1",
            vec![
                PromptMessage::system(CONVERSATION_SUMMARY_SYSTEM),
                PromptMessage::user(CONVERSATION_SUMMARY_TEMPLATE),
            ],
        )
        .with_config(PromptConfig {
            require_content: Some(false),
            temperature: None,
        }),
        Prompt::new(
            WRITE_ARTICLE,
            "gpt-4.1",
            vec![PromptMessage::system(WRITE_ARTICLE_SYSTEM)],
        ),
    ]
}
