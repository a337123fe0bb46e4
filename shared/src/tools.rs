//! Tool declarations and the instruction profile for the chat assistant.

use serde_json::json;

use crate::generation::ToolSchema;
use crate::models::{ChatRequest, ToolInvocation};

pub const ADD_KEYWORDS: &str = "add_keywords";
pub const GENERATE_DOCUMENT: &str = "generate_document";
pub const SEARCH_CASE_LAW: &str = "search_case_law";

const ASSISTANT_ROLE: &str = "\
Sen Türk hukukunda uzman, dikkatli ve titiz bir hukuk asistanısın. \
Avukatlara dava hazırlığında yardım ediyorsun.";

const ASSISTANT_GOALS: &str = "\
Hedeflerin:
1. Kullanıcının anlattığı olayı netleştirmek için gerekli soruları sormak.
2. Önemli hukuki kavramları tespit edip add_keywords aracıyla anahtar kelime listesine eklemek.
3. Emsal karar gerektiğinde search_case_law aracını kısa ve öz bir arama sorgusuyla çağırmak.
4. Kullanıcı dilekçe veya belge istediğinde generate_document aracını çağırmak.
5. Yanıtlarını Türkçe, açık ve resmi bir dille vermek; mevzuat maddelerine atıf yapmak.";

/// Function declarations offered to the model in every chat turn.
pub fn chat_tools() -> Vec<ToolSchema> {
    vec![
        ToolSchema {
            name: ADD_KEYWORDS.to_string(),
            description: "Davayla ilgili hukuki anahtar kelimeleri kullanıcının anahtar kelime listesine ekler.".to_string(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "keywords": {
                        "type": "array",
                        "items": {"type": "string"},
                        "description": "Eklenecek anahtar kelimeler"
                    }
                },
                "required": ["keywords"]
            }),
        },
        ToolSchema {
            name: GENERATE_DOCUMENT.to_string(),
            description: "Sohbette toplanan bilgilere dayanarak dilekçe veya hukuki belge taslağı oluşturulmasını başlatır.".to_string(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "documentType": {"type": "string", "description": "Belge türü, ör. dava dilekçesi"},
                    "instructions": {"type": "string", "description": "Belgeye dair ek talimatlar"}
                },
                "required": ["documentType"]
            }),
        },
        ToolSchema {
            name: SEARCH_CASE_LAW.to_string(),
            description: "Yargıtay, Danıştay ve bölge adliye mahkemesi kararları arasında emsal arar.".to_string(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "query": {"type": "string", "description": "Arama sorgusu"}
                },
                "required": ["query"]
            }),
        },
    ]
}

/// Build the system instruction for a chat request.
pub fn instruction_profile(request: &ChatRequest) -> String {
    let mut profile = format!("{}\n\n{}", ASSISTANT_ROLE, ASSISTANT_GOALS);

    let context = [
        ("Dava özeti", request.case_summary.as_deref()),
        ("Anahtar kelimeler", request.keywords.as_deref()),
        ("Önceki araştırma özeti", request.research_summary.as_deref()),
    ];

    for (label, value) in context {
        if let Some(value) = value.map(str::trim).filter(|v| !v.is_empty()) {
            profile.push_str(&format!("\n\n{}:\n{}", label, value));
        }
    }

    profile
}

/// Query argument of a `search_case_law` call; empty when missing or malformed.
pub fn search_query(invocation: &ToolInvocation) -> String {
    invocation
        .string_arg("query")
        .map(|q| q.trim().to_string())
        .unwrap_or_default()
}
