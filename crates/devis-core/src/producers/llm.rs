//! Chat-completion fallback returning the record as strict JSON.

use std::time::Instant;

#[cfg(feature = "llm")]
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{info, warn};

use crate::devis::assembler::AssembledRecord;
use crate::devis::rules::contamination::ContaminationFilter;
use crate::devis::rules::reference::ReferenceDecoder;
use crate::devis::strategy::{ExtractionStrategy, SourceDocument, StrategyKind, StrategyOutput};
use crate::error::ProducerError;
use crate::models::config::{ExtractionConfig, LlmConfig};
use crate::models::devis::{DevisRecord, Field, Provenance};

/// Instructions sent with every request.
const SYSTEM_PROMPT: &str = r#"Tu extrais les données d'un devis d'escalier SRX.
Retourne UNIQUEMENT un objet JSON valide, sans markdown, sans texte avant ou après.
Utilise des double quotes pour toutes les clés et toutes les chaînes.

Clés attendues (chaîne vide si inconnu):
- "reference": référence du devis, forme SRX + AAMM + 3 lettres + 6 chiffres
- "ref_affaire", "date_devis" (JJ/MM/AAAA)
- "client_code", "client_nom", "client_contact", "client_adresse1", "client_adresse2",
  "client_cp", "client_ville", "client_tel", "client_email": le CLIENT du devis
- "commercial_nom", "commercial_tel", "commercial_tel2", "commercial_email"
- "fourniture_ht", "prestations_ht", "total_ht": montants hors taxes
- "esc_gamme", "esc_essence", "esc_finition_marches", "esc_finition_structure",
  "esc_finition_mains_courante", "esc_finition_contremarche", "esc_finition_rampe",
  "esc_nez_de_marches", "esc_tete_de_poteau", "esc_poteaux_depart",
  "esc_remplissage_rampant", "esc_remplissage_etage", "esc_remplissage_soubassement"
- "pose_sold": true si une ligne de pose chiffrée figure dans les prestations
- "pose_amount": montant de cette ligne de pose

Les coordonnées de l'émetteur du devis (en-tête, pied de page, société RIAUX)
ne sont JAMAIS celles du client."#;

/// Appended on the second attempt when the first answer held issuer data.
const REVISED_NOTE: &str = "La réponse précédente contenait les coordonnées de l'émetteur \
dans les champs client. Ignore l'en-tête et le pied de page: le client est le bloc \
situé autour de \"Code client\".";

/// Sends one system + user exchange and returns the reply text.
pub trait ChatClient: Send + Sync {
    fn complete(&self, system: &str, user: &str) -> Result<String, ProducerError>;
}

#[cfg(feature = "llm")]
#[derive(Debug, Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<ChatMessage>,
    temperature: f64,
}

#[cfg(feature = "llm")]
#[derive(Debug, Serialize, Deserialize)]
struct ChatMessage {
    role: String,
    content: String,
}

#[cfg(feature = "llm")]
#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[cfg(feature = "llm")]
#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

/// OpenAI-compatible `/chat/completions` endpoint.
#[cfg(feature = "llm")]
pub struct HttpChatClient {
    client: reqwest::blocking::Client,
    url: String,
    model: String,
    api_key: String,
    timeout_secs: u64,
}

#[cfg(feature = "llm")]
impl HttpChatClient {
    pub fn from_config(config: &LlmConfig) -> Result<Self, ProducerError> {
        let api_key = config.resolve_api_key().ok_or_else(|| {
            ProducerError::Unavailable(format!("no API key (set {})", config.api_key_env))
        })?;
        let client = reqwest::blocking::Client::builder()
            .timeout(std::time::Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| ProducerError::Unavailable(e.to_string()))?;

        Ok(Self {
            client,
            url: format!("{}/chat/completions", config.base_url.trim_end_matches('/')),
            model: config.model.clone(),
            api_key,
            timeout_secs: config.timeout_secs,
        })
    }
}

#[cfg(feature = "llm")]
impl ChatClient for HttpChatClient {
    fn complete(&self, system: &str, user: &str) -> Result<String, ProducerError> {
        let request = ChatRequest {
            model: self.model.clone(),
            messages: vec![
                ChatMessage {
                    role: "system".to_string(),
                    content: system.to_string(),
                },
                ChatMessage {
                    role: "user".to_string(),
                    content: user.to_string(),
                },
            ],
            temperature: 0.0,
        };

        let response = self
            .client
            .post(&self.url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&request)
            .send()
            .map_err(|e| {
                if e.is_timeout() {
                    ProducerError::Timeout(self.timeout_secs)
                } else {
                    ProducerError::Call(e.to_string())
                }
            })?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().unwrap_or_default();
            return Err(ProducerError::Call(format!("LLM API error {}: {}", status, body)));
        }

        let chat: ChatResponse = response
            .json()
            .map_err(|e| ProducerError::InvalidResponse(e.to_string()))?;
        chat.choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .ok_or_else(|| ProducerError::InvalidResponse("empty response".to_string()))
    }
}

/// Parse a reply that should be a JSON object, tolerating fences and chatter.
pub fn parse_llm_json(content: &str) -> Result<Value, ProducerError> {
    let stripped = content
        .trim()
        .trim_start_matches("```json")
        .trim_start_matches("```")
        .trim_end_matches("```")
        .trim();
    let object = extract_json_object(stripped)?;
    let value: Value = serde_json::from_str(object)
        .map_err(|e| ProducerError::InvalidResponse(format!("{}: {}", e, object)))?;
    if !value.is_object() {
        return Err(ProducerError::InvalidResponse("not a JSON object".to_string()));
    }
    Ok(value)
}

/// Outermost `{...}` of `s`.
fn extract_json_object(s: &str) -> Result<&str, ProducerError> {
    let start = s
        .find('{')
        .ok_or_else(|| ProducerError::InvalidResponse("no '{' in response".to_string()))?;
    let end = s
        .rfind('}')
        .ok_or_else(|| ProducerError::InvalidResponse("no '}' in response".to_string()))?;
    if end <= start {
        return Err(ProducerError::InvalidResponse("malformed JSON".to_string()));
    }
    Ok(&s[start..=end])
}

/// Map the JSON keys onto a record. Unknown keys are ignored.
pub fn record_from_json(value: &Value, decoder: &ReferenceDecoder) -> DevisRecord {
    let mut record = DevisRecord::new();

    if let Some(reference) = value
        .get("reference")
        .and_then(Value::as_str)
        .and_then(|r| decoder.decode_str(r))
    {
        record.set_reference(Some(&reference));
    }

    for field in Field::ALL.iter().copied().filter(|f| !f.is_reference()) {
        let text = match value.get(field.as_str()) {
            Some(Value::String(s)) => s.trim().to_string(),
            Some(Value::Number(n)) => n.to_string(),
            _ => continue,
        };
        if !text.is_empty() {
            record.set(field, text);
        }
    }

    record.pose_sold = value
        .get("pose_sold")
        .and_then(Value::as_bool)
        .unwrap_or(false);
    record
}

/// Asks a chat model for the fields the rules could not find.
pub struct LlmStrategy {
    client: Option<Box<dyn ChatClient>>,
    unavailable: String,
    decoder: ReferenceDecoder,
    filter: ContaminationFilter,
    max_chars: usize,
}

impl LlmStrategy {
    pub fn new(client: Box<dyn ChatClient>, extraction: &ExtractionConfig) -> Self {
        Self::with_client(Some(client), extraction)
    }

    fn with_client(client: Option<Box<dyn ChatClient>>, extraction: &ExtractionConfig) -> Self {
        Self {
            client,
            unavailable: String::new(),
            decoder: ReferenceDecoder::with_prefix(&extraction.reference_prefix),
            filter: ContaminationFilter::new()
                .with_extra_markers(&extraction.extra_contamination_markers),
            max_chars: LlmConfig::default().max_chars,
        }
    }

    pub fn with_max_chars(mut self, max_chars: usize) -> Self {
        self.max_chars = max_chars;
        self
    }

    /// Strategy backed by the configured HTTP endpoint.
    ///
    /// Disabled or keyless configurations yield a strategy that reports
    /// itself unavailable on use.
    pub fn from_config(config: &LlmConfig, extraction: &ExtractionConfig) -> Self {
        let client: Result<Box<dyn ChatClient>, ProducerError> = if !config.enabled {
            Err(ProducerError::Unavailable("LLM fallback disabled".to_string()))
        } else {
            http_client(config)
        };

        match client {
            Ok(client) => Self::new(client, extraction).with_max_chars(config.max_chars),
            Err(e) => Self {
                unavailable: e.to_string(),
                ..Self::with_client(None, extraction)
            },
        }
    }

    fn user_prompt(&self, text: &str, hint: &DevisRecord, revised: bool) -> String {
        let missing: Vec<&str> = hint.missing_critical().iter().map(|f| f.as_str()).collect();
        let mut prompt = String::new();
        if revised {
            prompt.push_str(REVISED_NOTE);
            prompt.push_str("\n\n");
        }
        if !missing.is_empty() {
            prompt.push_str(&format!("Champs prioritaires: {}\n\n", missing.join(", ")));
        }
        prompt.push_str("Texte du devis:\n\n");
        prompt.push_str(text);
        prompt
    }

    fn is_contaminated(&self, record: &DevisRecord) -> bool {
        Field::COUNTERPARTY
            .iter()
            .any(|&f| self.filter.is_contaminated(record.get(f)))
    }
}

#[cfg(feature = "llm")]
fn http_client(config: &LlmConfig) -> Result<Box<dyn ChatClient>, ProducerError> {
    Ok(Box::new(HttpChatClient::from_config(config)?))
}

#[cfg(not(feature = "llm"))]
fn http_client(_config: &LlmConfig) -> Result<Box<dyn ChatClient>, ProducerError> {
    Err(ProducerError::Unavailable(
        "built without the llm feature".to_string(),
    ))
}

impl ExtractionStrategy for LlmStrategy {
    fn kind(&self) -> StrategyKind {
        StrategyKind::LlmFallback
    }

    fn provenance(&self) -> Provenance {
        Provenance::Llm
    }

    fn extract(
        &self,
        source: &SourceDocument,
        hint: &DevisRecord,
    ) -> Result<StrategyOutput, ProducerError> {
        let Some(client) = &self.client else {
            return Err(ProducerError::Unavailable(self.unavailable.clone()));
        };

        // Letterhead lines are never sent, so they cannot come back as client data.
        let full = source.text();
        let full = self.filter.filter_lines(full.lines()).join("\n");
        if !full.chars().any(char::is_alphabetic) {
            return Err(ProducerError::NotApplicable("no text to send".to_string()));
        }
        let text: String = full.chars().take(self.max_chars).collect();

        let start = Instant::now();
        let mut record = None;
        for revised in [false, true] {
            let reply = client.complete(SYSTEM_PROMPT, &self.user_prompt(&text, hint, revised))?;
            let candidate = record_from_json(&parse_llm_json(&reply)?, &self.decoder);
            let contaminated = self.is_contaminated(&candidate);
            record = Some(candidate);
            if !contaminated {
                break;
            }
            warn!("LLM answer holds issuer data in client fields");
        }
        let record = record.unwrap_or_default();

        info!("LLM answered in {}ms", start.elapsed().as_millis());

        let mut output = AssembledRecord {
            record,
            ..AssembledRecord::default()
        };
        for field in Field::ALL {
            if !output.record.get(field).is_empty() {
                output.provenance.insert(field, Provenance::Llm);
            }
        }
        Ok(output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::sync::Mutex;

    /// Replays canned answers and records the prompts.
    struct ScriptedClient {
        replies: Mutex<Vec<String>>,
        prompts: Mutex<Vec<String>>,
    }

    impl ScriptedClient {
        fn new(replies: &[&str]) -> Self {
            Self {
                replies: Mutex::new(replies.iter().rev().map(|r| r.to_string()).collect()),
                prompts: Mutex::new(Vec::new()),
            }
        }
    }

    impl ChatClient for &'static ScriptedClient {
        fn complete(&self, _system: &str, user: &str) -> Result<String, ProducerError> {
            self.prompts.lock().unwrap().push(user.to_string());
            self.replies
                .lock()
                .unwrap()
                .pop()
                .ok_or_else(|| ProducerError::Call("no more replies".to_string()))
        }
    }

    fn strategy(client: &'static ScriptedClient) -> LlmStrategy {
        LlmStrategy::new(Box::new(client), &ExtractionConfig::default())
    }

    fn leak(client: ScriptedClient) -> &'static ScriptedClient {
        Box::leak(Box::new(client))
    }

    #[test]
    fn test_parse_llm_json_strips_fences() {
        let value = parse_llm_json("```json\n{\"client_nom\": \"DUPONT\"}\n```").unwrap();
        assert_eq!(value["client_nom"], "DUPONT");

        let value = parse_llm_json("Voici le résultat: {\"total_ht\": 12} fin").unwrap();
        assert_eq!(value["total_ht"], 12);

        assert!(parse_llm_json("pas de json").is_err());
    }

    #[test]
    fn test_record_from_json() {
        let value = serde_json::json!({
            "reference": "SRX2511AFF037501",
            "client_nom": " DUPONT ",
            "fourniture_ht": 4894.08,
            "pose_sold": true,
            "devis_num": "999999",
            "unknown": "x"
        });
        let record = record_from_json(&value, &ReferenceDecoder::new());
        assert_eq!(record.devis_num(), "037501");
        assert_eq!(record.client_nom, "DUPONT");
        assert_eq!(record.fourniture_ht, "4894.08");
        assert!(record.pose_sold);
    }

    #[test]
    fn test_extract_marks_llm_provenance() {
        let client = leak(ScriptedClient::new(&[
            r#"{"client_nom": "DUPONT", "commercial_nom": "Julien LEROY"}"#,
        ]));
        let source = SourceDocument::from_text(None, "Devis escalier");
        let out = strategy(client).extract(&source, &DevisRecord::new()).unwrap();
        assert_eq!(out.record.commercial_nom, "Julien LEROY");
        assert_eq!(out.provenance.get(&Field::ClientNom), Some(&Provenance::Llm));

        let prompts = client.prompts.lock().unwrap();
        assert_eq!(prompts.len(), 1);
        assert!(prompts[0].contains("client_nom"));
    }

    #[test]
    fn test_contaminated_answer_is_retried_once() {
        let client = leak(ScriptedClient::new(&[
            r#"{"client_nom": "RIAUX ESCALIERS"}"#,
            r#"{"client_nom": "DUPONT"}"#,
        ]));
        let source = SourceDocument::from_text(None, "Devis escalier");
        let out = strategy(client).extract(&source, &DevisRecord::new()).unwrap();
        assert_eq!(out.record.client_nom, "DUPONT");

        let prompts = client.prompts.lock().unwrap();
        assert_eq!(prompts.len(), 2);
        assert!(prompts[1].starts_with(REVISED_NOTE));
    }

    #[test]
    fn test_letterhead_is_not_sent() {
        let client = leak(ScriptedClient::new(&[r#"{"client_nom": "DUPONT"}"#]));
        let source = SourceDocument::from_text(
            None,
            "RIAUX ESCALIERS\nZA de Vaugarny\nTél +33 2 99 97 45 40\nCode client\nDUPONT",
        );
        strategy(client).extract(&source, &DevisRecord::new()).unwrap();

        let prompts = client.prompts.lock().unwrap();
        assert!(prompts[0].ends_with("Code client\nDUPONT"));
        assert!(!prompts[0].contains("RIAUX"));
        assert!(!prompts[0].contains("99 97"));
    }

    #[test]
    fn test_letterhead_only_is_not_applicable() {
        let client = leak(ScriptedClient::new(&["{}"]));
        let source = SourceDocument::from_text(None, "RIAUX ESCALIERS\n35560 BAZOUGES");
        let err = strategy(client).extract(&source, &DevisRecord::new()).unwrap_err();
        assert!(matches!(err, ProducerError::NotApplicable(_)));
    }

    #[test]
    fn test_text_is_truncated() {
        let client = leak(ScriptedClient::new(&["{}"]));
        let source = SourceDocument::from_text(None, &"é".repeat(50));
        strategy(client)
            .with_max_chars(10)
            .extract(&source, &DevisRecord::new())
            .unwrap();
        let prompts = client.prompts.lock().unwrap();
        assert!(prompts[0].ends_with(&"é".repeat(10)));
        assert!(!prompts[0].contains(&"é".repeat(11)));
    }

    #[test]
    fn test_disabled_strategy_is_unavailable() {
        let strategy = LlmStrategy::from_config(&LlmConfig::default(), &ExtractionConfig::default());
        let err = strategy
            .extract(&SourceDocument::from_text(None, "Devis"), &DevisRecord::new())
            .unwrap_err();
        assert!(matches!(err, ProducerError::Unavailable(_)));
    }
}
