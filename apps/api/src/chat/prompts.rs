use crate::llm_client::prompts::{ASSISTANT_IDENTITY, GROUNDING_INSTRUCTION};
use crate::llm_client::ChatMessage;
use crate::models::document::{DocumentMetadataRow, MatchedChunkRow};

/// System prompt for a chat about one document.
///
/// With no matching chunks the prompt falls back to the document's metadata
/// so the model can still say what the document is.
pub fn build_system_prompt(document: &DocumentMetadataRow, chunks: &[MatchedChunkRow]) -> String {
    let mut prompt = format!("{ASSISTANT_IDENTITY}\n\n{GROUNDING_INSTRUCTION}\n\n");
    prompt.push_str(&format!("Document: \"{}\"\n", document.title));

    if chunks.is_empty() {
        prompt.push_str(&format!(
            "Uploaded: {}\n\nNo excerpts of this document matched the question. \
             Say so, and only describe the document by its title.",
            document.created_at.format("%Y-%m-%d")
        ));
        return prompt;
    }

    prompt.push_str("\nExcerpts:\n");
    for chunk in chunks {
        prompt.push_str(&format!("\n[{}] {}\n", chunk.chunk_index + 1, chunk.content));
    }
    prompt
}

/// System prompt for chats that are not tied to a document.
pub fn generic_system_prompt() -> String {
    format!(
        "{ASSISTANT_IDENTITY}\n\nHelp with commercial real-estate questions such as \
         underwriting, lease terms and marketing listings. Be concise. If a question \
         needs figures from a specific property, ask the broker to open that document's chat."
    )
}

/// System prompt, then prior turns oldest first, then the new question.
pub fn compose_messages(system: String, history: Vec<ChatMessage>, question: &str) -> Vec<ChatMessage> {
    let mut messages = Vec::with_capacity(history.len() + 2);
    messages.push(ChatMessage::system(system));
    messages.extend(history);
    messages.push(ChatMessage::user(question));
    messages
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};
    use uuid::Uuid;

    use super::*;

    fn document() -> DocumentMetadataRow {
        DocumentMetadataRow {
            id: Uuid::new_v4(),
            broker_id: Uuid::new_v4(),
            title: "Harbor Plaza OM".to_string(),
            url: None,
            created_at: Utc.with_ymd_and_hms(2025, 3, 14, 12, 0, 0).unwrap(),
        }
    }

    fn chunk(index: i32, content: &str) -> MatchedChunkRow {
        MatchedChunkRow {
            id: index as i64,
            file_id: Uuid::new_v4(),
            content: content.to_string(),
            chunk_index: index,
            similarity: 0.8,
        }
    }

    #[test]
    fn test_prompt_includes_excerpts_in_order() {
        let doc = document();
        let prompt = build_system_prompt(
            &doc,
            &[chunk(4, "NOI is $1.2M."), chunk(0, "Harbor Plaza is a 120-unit property.")],
        );
        assert!(prompt.contains("Harbor Plaza OM"));
        let noi = prompt.find("[5] NOI is $1.2M.").unwrap();
        let intro = prompt.find("[1] Harbor Plaza is").unwrap();
        assert!(noi < intro);
        assert!(!prompt.contains("No excerpts"));
    }

    #[test]
    fn test_prompt_falls_back_to_metadata() {
        let prompt = build_system_prompt(&document(), &[]);
        assert!(prompt.contains("Harbor Plaza OM"));
        assert!(prompt.contains("2025-03-14"));
        assert!(prompt.contains("No excerpts"));
    }

    #[test]
    fn test_compose_messages_order() {
        let messages = compose_messages(
            "sys".to_string(),
            vec![ChatMessage::user("Price?"), ChatMessage::assistant("$4.25M.")],
            "Cap rate?",
        );
        let roles: Vec<&str> = messages.iter().map(|m| m.role.as_str()).collect();
        assert_eq!(roles, vec!["system", "user", "assistant", "user"]);
        assert_eq!(messages[3].content, "Cap rate?");
    }
}
