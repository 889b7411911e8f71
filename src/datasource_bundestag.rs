//! German Bundestag datasource.
//!
//! Combines two public APIs into one datasource:
//!
//! - **BundestagMine** — individual plenary speeches. Protocols are
//!   walked top-down (protocol → agenda items → speeches), and each
//!   speech is enriched with its speaker's name and party.
//! - **DIP** (Dokumentations- und Informationssystem für Parlamentsmaterialien)
//!   — full plenary protocols, Drucksachen (printed papers), and
//!   legislative proceedings, fetched with cursor pagination and a
//!   per-document text endpoint.
//!
//! Plenary protocol text carries large appendix blocks (attendance
//! lists, roll-call name registers) that would drown retrieval in noise;
//! [`filter_protocol_text`] strips them before the document is stored.
//! Party names mentioned in a protocol are mined from the text and kept
//! as metadata.
//!
//! # Configuration
//!
//! ```json
//! "datasources": {
//!   "bundestag": {
//!     "include_bundestag_mine": true,
//!     "include_dip": true,
//!     "dip_wahlperiode": 21,
//!     "dip_sources": ["protocols", "drucksachen"],
//!     "export_limit": 50
//!   }
//! }
//! ```
//!
//! # Environment Variables
//!
//! - `DIP_API_KEY` — personal DIP key; without one the publicly
//!   published test key is used.

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeZone, Utc};
use serde_json::{json, Value};
use std::collections::HashMap;

use crate::config::BundestagConfig;
use crate::http::ApiClient;
use crate::models::SourceItem;
use crate::traits::{BasicManager, Parser, Reader};

const MINE_BASE_URL: &str = "https://bundestag-mine.de/api/DashboardController";
const DIP_BASE_URL: &str = "https://search.dip.bundestag.de/api/v1";

/// Public test key published in the DIP API documentation.
const DEFAULT_DIP_API_KEY: &str = "OSOegLs.PR2lwJ1dwCeje9vTj7FPOt3hvpYKtwKkhw";

/// Upper bound on list pages fetched per DIP document kind.
const MAX_LIST_PAGES: usize = 10;
/// Documents fetched per DIP kind when no export limit is configured.
const DEFAULT_KIND_LIMIT: usize = 50;

pub fn manager(config: &BundestagConfig) -> Result<BasicManager> {
    if !config.include_bundestag_mine && !config.include_dip {
        anyhow::bail!("Bundestag datasource has both clients disabled");
    }

    let mine = if config.include_bundestag_mine {
        Some(MineClient {
            api: ApiClient::new(MINE_BASE_URL)?,
        })
    } else {
        None
    };

    let dip = if config.include_dip {
        let api_key = config
            .dip_api_key
            .clone()
            .or_else(|| std::env::var("DIP_API_KEY").ok())
            .unwrap_or_else(|| DEFAULT_DIP_API_KEY.to_string());
        Some(DipClient {
            api: ApiClient::new(DIP_BASE_URL)?,
            api_key,
            wahlperiode: config.dip_wahlperiode,
            sources: config.dip_sources.clone(),
        })
    } else {
        None
    };

    Ok(BasicManager::new(
        "bundestag",
        "Speeches and documents of the German Bundestag",
        Box::new(BundestagReader {
            mine,
            dip,
            export_limit: config.export_limit,
        }),
        Box::new(BundestagParser),
    ))
}

// ═══════════════════════════════════════════════════════════════════════
// Reader
// ═══════════════════════════════════════════════════════════════════════

pub struct BundestagReader {
    mine: Option<MineClient>,
    dip: Option<DipClient>,
    export_limit: Option<usize>,
}

#[async_trait]
impl Reader for BundestagReader {
    async fn read_all(&self) -> Result<Vec<Value>> {
        let mut records = Vec::new();
        let mut any_ok = false;

        if let Some(mine) = &self.mine {
            match mine.fetch_speeches(self.export_limit).await {
                Ok(mut speeches) => {
                    any_ok = true;
                    records.append(&mut speeches);
                }
                Err(e) => eprintln!("Warning: BundestagMine fetch failed: {:#}", e),
            }
        }

        if let Some(dip) = &self.dip {
            match dip.fetch_all(self.export_limit).await {
                Ok(mut documents) => {
                    any_ok = true;
                    records.append(&mut documents);
                }
                Err(e) => eprintln!("Warning: DIP fetch failed: {:#}", e),
            }
        }

        if !any_ok {
            anyhow::bail!("no Bundestag client succeeded");
        }
        Ok(records)
    }
}

// ═══════════════════════════════════════════════════════════════════════
// BundestagMine client
// ═══════════════════════════════════════════════════════════════════════

struct MineClient {
    api: ApiClient,
}

impl MineClient {
    /// Walk protocols → agenda items → speeches, stamping each speech
    /// with its protocol context. Speakers are resolved once and cached.
    async fn fetch_speeches(&self, limit: Option<usize>) -> Result<Vec<Value>> {
        let cap = limit.unwrap_or(usize::MAX);
        let protocols = envelope_result(self.api.get_json("/GetProtocols", &[]).await?)?;
        let protocols = protocols.as_array().cloned().unwrap_or_default();

        let mut speeches = Vec::new();
        let mut speaker_cache: HashMap<String, Value> = HashMap::new();

        'protocols: for protocol in &protocols {
            let (Some(protocol_id), Some(lp), Some(number)) = (
                protocol["id"].as_str(),
                int_field(&protocol["legislaturePeriod"]),
                int_field(&protocol["number"]),
            ) else {
                continue;
            };
            let date = protocol["date"].as_str().unwrap_or_default().to_string();

            let agenda_items = match self.agenda_items(protocol_id).await {
                Ok(items) => items,
                Err(e) => {
                    eprintln!(
                        "Warning: failed to fetch agenda items for protocol {}: {:#}",
                        protocol_id, e
                    );
                    continue;
                }
            };

            for item in &agenda_items {
                let Some(agenda_number) = string_field(&item["agendaItemNumber"]) else {
                    continue;
                };

                let batch = match self.speeches_of(lp, number, &agenda_number).await {
                    Ok(batch) => batch,
                    Err(e) => {
                        eprintln!(
                            "Warning: failed to fetch speeches for agenda item {}/{}/{}: {:#}",
                            number, lp, agenda_number, e
                        );
                        continue;
                    }
                };

                for mut speech in batch {
                    if let Some(speaker_id) = speech["speakerId"].as_str().map(str::to_string) {
                        if !speaker_cache.contains_key(&speaker_id) {
                            if let Ok(speaker) = self.speaker(&speaker_id).await {
                                speaker_cache.insert(speaker_id.clone(), speaker);
                            }
                        }
                        if let Some(speaker) = speaker_cache.get(&speaker_id) {
                            speech["speaker"] = speaker.clone();
                        }
                    }

                    speech["kind"] = json!("speech");
                    speech["date"] = json!(date);
                    speech["legislaturePeriod"] = json!(lp);
                    speech["protocolNumber"] = json!(number);
                    speech["agendaItemNumber"] = json!(agenda_number);

                    speeches.push(speech);
                    if speeches.len() >= cap {
                        break 'protocols;
                    }
                }
            }
        }

        Ok(speeches)
    }

    async fn agenda_items(&self, protocol_id: &str) -> Result<Vec<Value>> {
        let result = envelope_result(
            self.api
                .get_json(&format!("/GetAgendaItemsOfProtocol/{}", protocol_id), &[])
                .await?,
        )?;
        Ok(result["agendaItems"].as_array().cloned().unwrap_or_default())
    }

    async fn speeches_of(&self, lp: i64, number: i64, agenda_number: &str) -> Result<Vec<Value>> {
        // The route takes one comma-joined key, encoded as a single segment
        let key = percent_encode(&format!("{},{},{}", lp, number, agenda_number));
        let result = envelope_result(
            self.api
                .get_json(&format!("/GetSpeechesOfAgendaItem/{}", key), &[])
                .await?,
        )?;
        Ok(result.as_array().cloned().unwrap_or_default())
    }

    async fn speaker(&self, speaker_id: &str) -> Result<Value> {
        envelope_result(
            self.api
                .get_json(&format!("/GetSpeakerById/{}", speaker_id), &[])
                .await?,
        )
    }
}

/// Unwrap the BundestagMine `{ "status": "200", "result": ... }` envelope.
fn envelope_result(mut response: Value) -> Result<Value> {
    let ok = match &response["status"] {
        Value::String(s) => s == "200",
        Value::Number(n) => n.as_i64() == Some(200),
        _ => false,
    };
    if !ok {
        anyhow::bail!("BundestagMine API returned status {}", response["status"]);
    }
    Ok(response["result"].take())
}

// ═══════════════════════════════════════════════════════════════════════
// DIP client
// ═══════════════════════════════════════════════════════════════════════

struct DipClient {
    api: ApiClient,
    api_key: String,
    wahlperiode: u32,
    sources: Vec<String>,
}

impl DipClient {
    async fn fetch_all(&self, export_limit: Option<usize>) -> Result<Vec<Value>> {
        let kind_limit = export_limit.unwrap_or(DEFAULT_KIND_LIMIT);
        let mut records = Vec::new();

        for source in &self.sources {
            match source.as_str() {
                "protocols" => records.append(&mut self.fetch_protocols(kind_limit).await?),
                "drucksachen" => records.append(&mut self.fetch_drucksachen(kind_limit).await?),
                "proceedings" => records.append(&mut self.fetch_proceedings(kind_limit).await?),
                other => eprintln!("Warning: unknown DIP source '{}', skipping", other),
            }
        }

        Ok(records)
    }

    /// Plenary protocols published by the Bundestag itself, with full text.
    async fn fetch_protocols(&self, limit: usize) -> Result<Vec<Value>> {
        let listed = self
            .list_documents("/plenarprotokoll", limit, |doc| {
                doc["herausgeber"].as_str() == Some("BT")
            })
            .await?;

        let mut records = Vec::new();
        for doc in listed {
            let Some(id) = string_field(&doc["id"]) else {
                continue;
            };
            let full = match self.fetch_text(&format!("/plenarprotokoll-text/{}", id)).await {
                Ok(full) => full,
                Err(e) => {
                    eprintln!("Warning: failed to fetch protocol text {}: {:#}", id, e);
                    continue;
                }
            };
            if !has_text(&full) {
                continue;
            }
            records.push(tag_kind(full, "dip_protocol"));
        }
        Ok(records)
    }

    async fn fetch_drucksachen(&self, limit: usize) -> Result<Vec<Value>> {
        let listed = self.list_documents("/drucksache", limit, |_| true).await?;

        let mut records = Vec::new();
        for doc in listed {
            let Some(id) = string_field(&doc["id"]) else {
                continue;
            };
            let full = match self.fetch_text(&format!("/drucksache-text/{}", id)).await {
                Ok(full) => full,
                Err(e) => {
                    eprintln!("Warning: failed to fetch drucksache text {}: {:#}", id, e);
                    continue;
                }
            };
            if !has_text(&full) {
                continue;
            }
            records.push(tag_kind(full, "dip_drucksache"));
        }
        Ok(records)
    }

    /// Proceedings carry their abstract in the list response; there is
    /// no separate text endpoint to call.
    async fn fetch_proceedings(&self, limit: usize) -> Result<Vec<Value>> {
        let listed = self.list_documents("/vorgang", limit, |_| true).await?;
        Ok(listed
            .into_iter()
            .map(|doc| tag_kind(doc, "dip_proceeding"))
            .collect())
    }

    /// Cursor-paginated listing. The DIP cursor is opaque; pagination
    /// ends when it comes back empty or unchanged.
    async fn list_documents(
        &self,
        path: &str,
        limit: usize,
        keep: impl Fn(&Value) -> bool,
    ) -> Result<Vec<Value>> {
        let mut documents = Vec::new();
        let mut cursor = "*".to_string();

        for _ in 0..MAX_LIST_PAGES {
            let query = [
                ("apikey", self.api_key.clone()),
                ("format", "json".to_string()),
                ("f.wahlperiode", self.wahlperiode.to_string()),
                ("cursor", cursor.clone()),
            ];
            let response = self.api.get_json(path, &query).await?;

            if let Some(page) = response["documents"].as_array() {
                for doc in page {
                    if keep(doc) {
                        documents.push(doc.clone());
                    }
                }
            }
            if documents.len() >= limit {
                break;
            }

            let next = response["cursor"].as_str().unwrap_or_default();
            if next.is_empty() || next == cursor {
                break;
            }
            cursor = next.to_string();
        }

        documents.truncate(limit);
        Ok(documents)
    }

    async fn fetch_text(&self, path: &str) -> Result<Value> {
        let query = [
            ("apikey", self.api_key.clone()),
            ("format", "json".to_string()),
        ];
        self.api.get_json(path, &query).await
    }
}

fn has_text(doc: &Value) -> bool {
    doc["text"].as_str().map(|t| !t.trim().is_empty()).unwrap_or(false)
}

fn tag_kind(mut doc: Value, kind: &str) -> Value {
    doc["kind"] = json!(kind);
    doc
}

// ═══════════════════════════════════════════════════════════════════════
// Protocol text filtering
// ═══════════════════════════════════════════════════════════════════════

const ANLAGE_MARKERS: &[&str] = &[
    "Entschuldigte Abgeordnete",
    "Namensverzeichnis",
    "Ergebnis und Namensverzeichnis",
];

const VERB_INDICATORS: &[&str] = &[
    " ist ", " sind ", " war ", " waren ", " hat ", " haben ", " hatte ", " wird ", " werden ",
    " wurde ", " wurden ", " kann ", " können ", " soll ", " muss ", " möchte ", " sage ",
    " sagen ", " glaube ", " denke ", " meine ", " macht ", " machen ", " gibt ", " geht ",
];

/// Name particles that stay lowercase inside attendance-list names.
const NAME_PARTICLES: &[&str] = &["von", "van", "de", "der", "den", "zu"];

/// Strip appendix blocks from plenary protocol text: the trailing
/// "Anlagen zum Stenografischen Bericht" section, inline Anlage blocks
/// (excused-members lists, roll-call registers), and long runs of bare
/// name lines.
pub fn filter_protocol_text(text: &str) -> String {
    let lines: Vec<&str> = text.lines().collect();
    let mut kept: Vec<&str> = Vec::new();
    let mut i = 0;

    while i < lines.len() {
        let trimmed = lines[i].trim();

        if trimmed.starts_with("Anlagen zum Stenografischen Bericht") {
            break;
        }

        if is_anlage_heading(trimmed) && looks_like_anlage_section(&lines, i) {
            i += 1;
            while i < lines.len() && !resumes_debate(lines[i]) {
                i += 1;
            }
            continue;
        }

        if is_name_list_line(trimmed) {
            let mut run = 1;
            while i + run < lines.len() && is_name_list_line(lines[i + run].trim()) {
                run += 1;
            }
            if run >= 5 {
                i += run;
                while i < lines.len() && !ends_name_list(lines[i]) {
                    i += 1;
                }
                continue;
            }
        }

        kept.push(lines[i]);
        i += 1;
    }

    kept.join("\n")
}

/// "Anlage" or "Anlage 3" on a line of its own.
fn is_anlage_heading(trimmed: &str) -> bool {
    match trimmed.strip_prefix("Anlage") {
        Some(rest) => {
            let rest = rest.trim();
            rest.is_empty() || rest.chars().all(|c| c.is_ascii_digit())
        }
        None => false,
    }
}

/// An Anlage heading starts a skippable section when the following lines
/// are nearly empty or name an attendance register.
fn looks_like_anlage_section(lines: &[&str], heading_idx: usize) -> bool {
    let lookahead: Vec<&str> = lines
        .iter()
        .skip(heading_idx + 1)
        .take(20)
        .copied()
        .collect();

    let non_empty = lookahead.iter().filter(|l| !l.trim().is_empty()).count();
    if non_empty <= 3 {
        return true;
    }
    lookahead
        .iter()
        .take(5)
        .any(|l| ANLAGE_MARKERS.iter().any(|marker| l.contains(marker)))
}

/// Debate text resumes at a speaker line ("Dr. Example (SPD):") or any
/// long prose line.
fn resumes_debate(line: &str) -> bool {
    let trimmed = line.trim();
    (trimmed.contains(':') && trimmed.len() > 10 && trimmed.ends_with(':')) || line.len() > 100
}

/// Short line of 2 to 5 words where nearly every word is capitalized or
/// a name particle, as found in attendance lists. Speaker lines end with
/// a colon and are never part of a name list.
fn is_name_list_line(trimmed: &str) -> bool {
    if trimmed.is_empty() || trimmed.len() >= 80 || trimmed.ends_with(':') {
        return false;
    }
    let words: Vec<&str> = trimmed.split_whitespace().collect();
    if !(2..=5).contains(&words.len()) {
        return false;
    }
    let name_like = words
        .iter()
        .filter(|word| {
            let clean = word.trim_matches(|c: char| !c.is_alphanumeric());
            clean.chars().next().map(char::is_uppercase).unwrap_or(false)
                || NAME_PARTICLES.contains(&clean.to_lowercase().as_str())
        })
        .count();
    name_like >= words.len().saturating_sub(1) && name_like >= 2
}

fn ends_name_list(line: &str) -> bool {
    let trimmed = line.trim();
    (trimmed.contains(':') && trimmed.ends_with(':')) || line.len() > 150 || has_verb(line)
}

fn has_verb(line: &str) -> bool {
    let padded = format!(" {} ", line.to_lowercase());
    VERB_INDICATORS.iter().any(|verb| padded.contains(verb))
}

// ═══════════════════════════════════════════════════════════════════════
// Party extraction
// ═══════════════════════════════════════════════════════════════════════

const MIN_PARTY_MENTIONS: usize = 2;

/// Parenthesized fragments that look like party tags but are not.
const NON_PARTY_KEYWORDS: &[&str] = &[
    "Bundeskanzler",
    "Bundesminister",
    "Präsident",
    "Staatssekretär",
    "Berlin",
    "Bonn",
    "parteilos",
    "fraktionslos",
    "Gast",
    "EU",
    "UN",
    "NATO",
    "USA",
    "TOP",
    "ZP",
];

/// Party names mentioned in protocol text, most frequent first.
///
/// Scans `(...)` groups after speaker names, keeps candidates that look
/// like party tags, and drops anything mentioned fewer than
/// [`MIN_PARTY_MENTIONS`] times. Near-duplicates ("CSU" next to
/// "CDU/CSU") collapse into the more frequent spelling.
pub fn extract_parties(text: &str) -> Vec<String> {
    let mut counts: HashMap<String, usize> = HashMap::new();

    let bytes = text.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'(' {
            if let Some(close) = text[i + 1..].find(')').map(|p| i + 1 + p) {
                if close - i <= 32 {
                    let candidate = text[i + 1..close].trim();
                    if is_likely_party(candidate) {
                        *counts.entry(candidate.to_string()).or_insert(0) += 1;
                    }
                }
                i = close + 1;
                continue;
            }
        }
        i += 1;
    }

    let mut ranked: Vec<(String, usize)> = counts
        .into_iter()
        .filter(|(_, count)| *count >= MIN_PARTY_MENTIONS)
        .collect();
    ranked.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));

    let mut parties: Vec<String> = Vec::new();
    for (name, _) in ranked {
        let duplicate = parties
            .iter()
            .any(|kept| kept.contains(name.as_str()) || name.contains(kept.as_str()));
        if !duplicate {
            parties.push(name);
        }
    }
    parties
}

fn is_likely_party(candidate: &str) -> bool {
    if candidate.len() < 2 || candidate.len() > 25 {
        return false;
    }
    if NON_PARTY_KEYWORDS.iter().any(|kw| candidate.contains(kw)) {
        return false;
    }
    if !candidate.chars().any(char::is_uppercase) {
        return false;
    }

    // Short all-caps style acronyms: SPD, AfD, FDP, BSW
    let char_count = candidate.chars().count();
    let upper_count = candidate.chars().filter(|c| c.is_uppercase()).count();
    if (2..=6).contains(&char_count)
        && candidate.chars().all(char::is_alphabetic)
        && upper_count >= 2
    {
        return true;
    }

    // Compound groups: CDU/CSU
    if let Some((left, right)) = candidate.split_once('/') {
        let both_alpha = !left.is_empty()
            && !right.is_empty()
            && left.chars().all(char::is_alphabetic)
            && right.chars().all(char::is_alphabetic);
        if both_alpha && upper_count * 2 >= char_count {
            return true;
        }
    }

    // "Die Linke" / "DIE LINKE"
    if let Some(rest) = candidate
        .strip_prefix("Die ")
        .or_else(|| candidate.strip_prefix("DIE "))
    {
        if rest.chars().next().map(char::is_uppercase).unwrap_or(false) {
            return true;
        }
    }

    // "Bündnis 90/Die Grünen" and spelling variants
    candidate.starts_with("Bündnis")
        || candidate.starts_with("BÜNDNIS")
        || candidate.starts_with("Bund")
}

// ═══════════════════════════════════════════════════════════════════════
// Parser
// ═══════════════════════════════════════════════════════════════════════

pub struct BundestagParser;

impl Parser for BundestagParser {
    fn parse(&self, record: &Value) -> Result<SourceItem> {
        match record["kind"].as_str() {
            Some("speech") => parse_speech(record),
            Some("dip_protocol") => parse_dip_document(record, DipKind::Protocol),
            Some("dip_drucksache") => parse_dip_document(record, DipKind::Drucksache),
            Some("dip_proceeding") => parse_dip_document(record, DipKind::Proceeding),
            other => anyhow::bail!("unknown Bundestag record kind: {:?}", other),
        }
    }
}

fn parse_speech(record: &Value) -> Result<SourceItem> {
    let id = record["id"]
        .as_str()
        .ok_or_else(|| anyhow::anyhow!("speech has no id"))?;
    let body = record["text"].as_str().unwrap_or_default().to_string();

    let lp = int_field(&record["legislaturePeriod"]).unwrap_or_default();
    let number = int_field(&record["protocolNumber"]).unwrap_or_default();
    let agenda_number = string_field(&record["agendaItemNumber"]).unwrap_or_default();
    let date_raw = record["date"].as_str().unwrap_or_default();

    let speaker = &record["speaker"];
    let first = speaker["firstName"].as_str().unwrap_or_default();
    let last = speaker["lastName"].as_str().unwrap_or_default();
    let speaker_name = format!("{} {}", first, last).trim().to_string();
    let party = speaker["party"].as_str().unwrap_or_default();

    let title = format!("Protocol/Legislature/AgendaItem {}/{}/{}", number, lp, agenda_number);
    let url = format!("https://dserver.bundestag.de/btp/{}/{}{:03}.pdf", lp, lp, number);
    let timestamp = parse_flexible_time(date_raw).unwrap_or_else(|| Utc.timestamp_opt(0, 0).unwrap());

    let mut metadata = json!({
        "datasource": "bundestag",
        "source_client": "bundestag_mine",
        "language": "de",
        "format": "md",
        "document_type": "speech",
        "title": title.clone(),
        "url": url.clone(),
        "agenda_item_number": agenda_number,
        "protocol_number": number,
        "legislature_period": lp,
        "document_number": format!("{}/{}", lp, number),
    });
    if !speaker_name.is_empty() {
        metadata["speaker"] = json!(speaker_name.clone());
    }
    if !party.is_empty() {
        metadata["speaker_party"] = json!(party);
    }
    if !date_raw.is_empty() {
        metadata["created_date"] = json!(date_part(date_raw));
        metadata["last_edited_date"] = json!(date_part(date_raw));
    }

    Ok(SourceItem {
        source: "bundestag".to_string(),
        source_id: id.to_string(),
        source_url: Some(url),
        title: Some(title),
        author: (!speaker_name.is_empty()).then_some(speaker_name),
        created_at: timestamp,
        updated_at: timestamp,
        content_type: "text/markdown".to_string(),
        body,
        metadata_json: metadata.to_string(),
    })
}

#[derive(Clone, Copy)]
enum DipKind {
    Protocol,
    Drucksache,
    Proceeding,
}

fn parse_dip_document(record: &Value, kind: DipKind) -> Result<SourceItem> {
    let id = string_field(&record["id"])
        .ok_or_else(|| anyhow::anyhow!("DIP document has no id"))?;

    let document_number = string_field(&record["dokumentnummer"]).unwrap_or_default();
    let titel = record["titel"].as_str().unwrap_or_default();

    let (document_type, title, body) = match kind {
        DipKind::Protocol => {
            let raw = record["text"].as_str().unwrap_or_default();
            ("protocol", titel.to_string(), filter_protocol_text(raw))
        }
        DipKind::Drucksache => {
            let raw = record["text"].as_str().unwrap_or_default();
            ("drucksache", format!("Drucksache {}", document_number), raw.to_string())
        }
        DipKind::Proceeding => {
            let number = string_field(&record["vorgangsnummer"]).unwrap_or_else(|| id.clone());
            let title = if titel.is_empty() {
                format!("Proceeding {}", number)
            } else {
                titel.to_string()
            };
            let abstract_text = record["abstract"].as_str().unwrap_or_default();
            ("proceeding", title, abstract_text.to_string())
        }
    };

    let created_raw = record["datum"].as_str().unwrap_or_default();
    let edited_raw = record["aktualisiert"].as_str().unwrap_or(created_raw);
    let created =
        parse_flexible_time(created_raw).unwrap_or_else(|| Utc.timestamp_opt(0, 0).unwrap());
    let updated = parse_flexible_time(edited_raw).unwrap_or(created);

    let url = match kind {
        DipKind::Proceeding => record["fundstelle"]["url"].as_str(),
        _ => record["fundstelle"]["pdf_url"].as_str(),
    }
    .map(str::to_string);

    let mut metadata = json!({
        "datasource": "bundestag",
        "source_client": "dip",
        "language": "de",
        "format": "md",
        "document_type": document_type,
        "document_id": id.clone(),
        "title": title.clone(),
    });
    if !document_number.is_empty() {
        metadata["document_number"] = json!(document_number);
        if matches!(kind, DipKind::Protocol) {
            metadata["protocol_number"] = json!(document_number);
        }
    }
    if matches!(kind, DipKind::Proceeding) {
        if let Some(number) = string_field(&record["vorgangsnummer"]) {
            metadata["document_number"] = json!(number);
        }
    }
    if let Some(wp) = string_field(&record["wahlperiode"]) {
        metadata["legislature_period"] = json!(wp);
    }
    if let Some(publisher) = record["herausgeber"].as_str() {
        metadata["publisher"] = json!(publisher);
    }
    if let Some(art) = record["dokumentart"].as_str() {
        metadata["document_art"] = json!(art);
    }
    if let Some(subtype) = record["drucksachetyp"].as_str() {
        metadata["document_subtype"] = json!(subtype);
    }
    if let Some(u) = &url {
        metadata["url"] = json!(u);
    }
    if !created_raw.is_empty() {
        metadata["created_date"] = json!(date_part(created_raw));
    }
    if !edited_raw.is_empty() {
        metadata["last_edited_date"] = json!(date_part(edited_raw));
    }
    if matches!(kind, DipKind::Protocol) {
        let parties = extract_parties(&body);
        if !parties.is_empty() {
            metadata["parties"] = json!(parties.join(", "));
        }
    }

    Ok(SourceItem {
        source: "bundestag".to_string(),
        source_id: id,
        source_url: url,
        title: Some(title),
        author: None,
        created_at: created,
        updated_at: updated,
        content_type: "text/markdown".to_string(),
        body,
        metadata_json: metadata.to_string(),
    })
}

// ═══════════════════════════════════════════════════════════════════════
// Helpers
// ═══════════════════════════════════════════════════════════════════════

fn int_field(value: &Value) -> Option<i64> {
    value
        .as_i64()
        .or_else(|| value.as_str().and_then(|s| s.trim().parse().ok()))
}

fn string_field(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn parse_flexible_time(raw: &str) -> Option<DateTime<Utc>> {
    if raw.is_empty() {
        return None;
    }
    if let Ok(t) = DateTime::parse_from_rfc3339(raw) {
        return Some(t.with_timezone(&Utc));
    }
    if let Ok(t) = NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S") {
        return Some(Utc.from_utc_datetime(&t));
    }
    if let Ok(d) = NaiveDate::parse_from_str(raw, "%Y-%m-%d") {
        return d.and_hms_opt(0, 0, 0).map(|t| Utc.from_utc_datetime(&t));
    }
    None
}

fn date_part(raw: &str) -> &str {
    raw.split('T').next().unwrap_or(raw)
}

/// Percent-encode every byte outside the RFC 3986 unreserved set, so a
/// comma-joined key survives as one path segment.
fn percent_encode(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for byte in value.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'.' | b'_' | b'~' => {
                out.push(byte as char)
            }
            _ => out.push_str(&format!("%{:02X}", byte)),
        }
    }
    out
}

// ─── Tests ─────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encodes_speech_key_as_single_segment() {
        assert_eq!(percent_encode("21,12,5 a"), "21%2C12%2C5%20a");
        assert_eq!(percent_encode("abc-123_x.y~z"), "abc-123_x.y~z");
    }

    #[test]
    fn envelope_rejects_error_status() {
        let ok = envelope_result(json!({ "status": "200", "result": [1, 2] })).unwrap();
        assert_eq!(ok, json!([1, 2]));
        assert!(envelope_result(json!({ "status": "500", "result": null })).is_err());
        assert!(envelope_result(json!({ "message": "no status" })).is_err());
    }

    #[test]
    fn protocol_filter_drops_trailing_appendix() {
        let text = "Debate line one.\nDebate line two.\nAnlagen zum Stenografischen Bericht\nAppendix junk\nMore junk";
        let filtered = filter_protocol_text(text);
        assert_eq!(filtered, "Debate line one.\nDebate line two.");
    }

    #[test]
    fn protocol_filter_skips_attendance_anlage() {
        let text = "Dr. Weber (SPD):\nWir beraten heute den Haushalt.\nAnlage 1\nEntschuldigte Abgeordnete\nMüller, Anna\nSchmidt, Jonas\nDr. Vogel (FDP):\nIch danke dem Kollegen.";
        let filtered = filter_protocol_text(text);
        assert!(filtered.contains("Wir beraten heute den Haushalt."));
        assert!(filtered.contains("Dr. Vogel (FDP):"));
        assert!(!filtered.contains("Entschuldigte Abgeordnete"));
        assert!(!filtered.contains("Müller, Anna"));
    }

    #[test]
    fn protocol_filter_drops_name_list_runs() {
        let names = "Anna Müller\nJonas Schmidt\nClara von Weber\nFelix Braun\nMarie Vogel\nLukas Peters\n";
        let text = format!(
            "Die Sitzung ist eröffnet.\n{}Präsidentin Clara Beispiel:\nWir fahren fort.",
            names
        );
        let filtered = filter_protocol_text(&text);
        assert!(filtered.contains("Die Sitzung ist eröffnet."));
        assert!(filtered.contains("Wir fahren fort."));
        assert!(!filtered.contains("Jonas Schmidt"));
    }

    #[test]
    fn short_name_runs_survive_filtering() {
        let text = "Erste Zeile der Debatte.\nAnna Müller\nJonas Schmidt\nDanach geht es weiter im Text.";
        let filtered = filter_protocol_text(text);
        assert!(filtered.contains("Anna Müller"));
    }

    #[test]
    fn party_heuristic_accepts_real_parties() {
        for party in ["SPD", "CDU/CSU", "AfD", "FDP", "BSW", "Die Linke", "BÜNDNIS 90/DIE GRÜNEN"] {
            assert!(is_likely_party(party), "expected {} to pass", party);
        }
    }

    #[test]
    fn party_heuristic_rejects_titles_and_places() {
        for not_party in ["Bundeskanzlerin", "Berlin", "parteilos", "Gast", "a", "lachen"] {
            assert!(!is_likely_party(not_party), "expected {} to fail", not_party);
        }
    }

    #[test]
    fn extracts_ranked_parties_from_text() {
        let text = "Dr. Weber (SPD): Rede eins. Zuruf (CDU/CSU). Frau Klein (SPD): Rede zwei. \
                    Beifall (CDU/CSU). Herr Groß (CDU/CSU): Rede drei. Einwurf (Berlin). Einzelfall (FDP).";
        let parties = extract_parties(text);
        assert_eq!(parties, vec!["CDU/CSU".to_string(), "SPD".to_string()]);
    }

    #[test]
    fn parses_speech_with_speaker() {
        let record = json!({
            "kind": "speech",
            "id": "c4f2aa9e-0001",
            "text": "Sehr geehrte Damen und Herren, wir beraten heute den Haushalt.",
            "date": "2025-03-14T00:00:00",
            "legislaturePeriod": 21,
            "protocolNumber": 12,
            "agendaItemNumber": "5",
            "speaker": { "firstName": "Erika", "lastName": "Beispiel", "party": "SPD" }
        });
        let item = BundestagParser.parse(&record).unwrap();
        assert_eq!(item.source, "bundestag");
        assert_eq!(item.source_id, "c4f2aa9e-0001");
        assert_eq!(item.author.as_deref(), Some("Erika Beispiel"));
        assert_eq!(
            item.source_url.as_deref(),
            Some("https://dserver.bundestag.de/btp/21/21012.pdf")
        );

        let meta: Value = serde_json::from_str(&item.metadata_json).unwrap();
        assert_eq!(meta["title"], "Protocol/Legislature/AgendaItem 12/21/5");
        assert_eq!(meta["speaker_party"], "SPD");
        assert_eq!(meta["document_number"], "21/12");
        assert_eq!(meta["created_date"], "2025-03-14");
        assert_eq!(meta["source_client"], "bundestag_mine");
    }

    #[test]
    fn parses_dip_protocol_with_party_metadata() {
        let record = json!({
            "kind": "dip_protocol",
            "id": 5104,
            "dokumentnummer": "21/12",
            "titel": "Protokoll der 12. Sitzung",
            "herausgeber": "BT",
            "dokumentart": "Plenarprotokoll",
            "wahlperiode": 21,
            "datum": "2025-03-14",
            "aktualisiert": "2025-03-15T08:30:00+02:00",
            "fundstelle": { "pdf_url": "https://dserver.bundestag.de/btp/21/21012.pdf" },
            "text": "Dr. Weber (SPD): Erste Rede. Beifall (SPD). Zuruf (CDU/CSU). Widerspruch (CDU/CSU)."
        });
        let item = BundestagParser.parse(&record).unwrap();
        assert_eq!(item.source_id, "5104");
        assert_eq!(item.title.as_deref(), Some("Protokoll der 12. Sitzung"));
        assert_eq!(item.updated_at.format("%Y-%m-%d").to_string(), "2025-03-15");

        let meta: Value = serde_json::from_str(&item.metadata_json).unwrap();
        assert_eq!(meta["source_client"], "dip");
        assert_eq!(meta["protocol_number"], "21/12");
        assert_eq!(meta["legislature_period"], "21");
        assert_eq!(meta["publisher"], "BT");
        let parties = meta["parties"].as_str().unwrap();
        assert!(parties.contains("SPD"));
        assert!(parties.contains("CDU/CSU"));
    }

    #[test]
    fn parses_drucksache_and_proceeding_titles() {
        let drucksache = json!({
            "kind": "dip_drucksache",
            "id": "270001",
            "dokumentnummer": "21/400",
            "drucksachetyp": "Antrag",
            "datum": "2025-04-02",
            "text": "Der Bundestag wolle beschließen."
        });
        let item = BundestagParser.parse(&drucksache).unwrap();
        assert_eq!(item.title.as_deref(), Some("Drucksache 21/400"));
        let meta: Value = serde_json::from_str(&item.metadata_json).unwrap();
        assert_eq!(meta["document_subtype"], "Antrag");
        assert_eq!(meta["document_type"], "drucksache");

        let proceeding = json!({
            "kind": "dip_proceeding",
            "id": "310007",
            "vorgangsnummer": "310007",
            "abstract": "Gesetzentwurf zur Änderung des Energierechts.",
            "datum": "2025-04-10"
        });
        let item = BundestagParser.parse(&proceeding).unwrap();
        assert_eq!(item.title.as_deref(), Some("Proceeding 310007"));
        assert_eq!(item.body, "Gesetzentwurf zur Änderung des Energierechts.");
    }

    #[test]
    fn unknown_kind_is_an_error() {
        assert!(BundestagParser.parse(&json!({ "kind": "other" })).is_err());
        assert!(BundestagParser.parse(&json!({})).is_err());
    }
}
