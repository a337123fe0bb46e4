//! Prompts for petition drafting and text rewriting.

use crate::generation::GenerationRequest;
use crate::models::{PetitionRequest, RewriteRequest, RewriteStyle};

const PETITION_INSTRUCTION: &str = "\
Sen Türk hukukunda deneyimli bir avukatsın. \
Verilen bilgilere dayanarak mahkemeye sunulmaya hazır, resmi dilde bir dilekçe yaz. \
Dilekçe başlık, taraflar, konu, açıklamalar, hukuki sebepler, deliller ve sonuç ve istem bölümlerini içersin. \
Bilinmeyen bilgiler için köşeli parantez içinde yer tutucu bırak. \
Yalnızca dilekçe metnini döndür.";

const REWRITE_INSTRUCTION: &str = "\
Sen Türkçe hukuki metinler konusunda uzman bir editörsün. \
Metnin anlamını ve hukuki içeriğini koru; yalnızca yeniden yazılmış metni döndür.";

const PETITION_TEMPERATURE: f32 = 0.4;
const REWRITE_TEMPERATURE: f32 = 0.3;

fn push_field(prompt: &mut String, label: &str, value: Option<&str>) {
    if let Some(value) = value.map(str::trim).filter(|v| !v.is_empty()) {
        prompt.push_str(label);
        prompt.push_str(": ");
        prompt.push_str(value);
        prompt.push('\n');
    }
}

/// Generation request for a petition draft.
pub fn petition_request(request: &PetitionRequest) -> GenerationRequest {
    let mut prompt = String::new();
    push_field(&mut prompt, "Dilekçe türü", Some(request.petition_type.as_str()));
    push_field(&mut prompt, "Mahkeme", request.court.as_deref());
    push_field(&mut prompt, "Taraflar", request.parties.as_deref());
    push_field(&mut prompt, "Dava özeti", Some(request.case_summary.as_str()));
    push_field(&mut prompt, "Anahtar kelimeler", request.keywords.as_deref());
    push_field(&mut prompt, "Emsal kararlar ve araştırma", request.research.as_deref());
    push_field(&mut prompt, "Ek talimatlar", request.instructions.as_deref());

    GenerationRequest {
        temperature: Some(PETITION_TEMPERATURE),
        ..GenerationRequest::prompt(PETITION_INSTRUCTION, prompt)
    }
}

impl RewriteStyle {
    pub fn directive(self) -> &'static str {
        match self {
            RewriteStyle::Formal => "Metni resmi ve profesyonel bir hukuk diliyle yeniden yaz.",
            RewriteStyle::Simplify => {
                "Metni hukuki terimleri sadeleştirerek, hukukçu olmayan birinin anlayacağı şekilde yeniden yaz."
            }
            RewriteStyle::Expand => {
                "Metni daha ayrıntılı ve kapsamlı hale getir; gerekçeleri ve hukuki dayanakları genişlet."
            }
            RewriteStyle::Summarize => "Metni ana noktalarını koruyarak kısa ve öz biçimde özetle.",
            RewriteStyle::Proofread => {
                "Metindeki yazım, dil bilgisi ve noktalama hatalarını düzelt; içeriği değiştirme."
            }
        }
    }
}

/// Generation request for a rewrite in the requested style.
pub fn rewrite_request(request: &RewriteRequest) -> GenerationRequest {
    let prompt = format!("{}\n\nMetin:\n{}", request.style.directive(), request.text.trim());
    GenerationRequest {
        temperature: Some(REWRITE_TEMPERATURE),
        ..GenerationRequest::prompt(REWRITE_INSTRUCTION, prompt)
    }
}
