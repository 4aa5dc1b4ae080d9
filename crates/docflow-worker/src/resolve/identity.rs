//! Patient identity resolution.
//!
//! Three signals are extracted from the evidence text (health identifier,
//! date of birth, name), each searched against the directory and narrowed to
//! at most one plausible candidate. The signals are then reconciled:
//!
//! 1. all three agree on a demographic number
//! 2. any two agree
//! 3. the model confirms a single-signal candidate (HIN, then DOB, then name)
//!    with a JSON identity that survives a fresh directory lookup
//!
//! Anything else is [`IdentityResolution::Unresolved`].

use chrono::NaiveDate;
use itertools::Itertools;
use regex::Regex;
use std::cmp::Ordering;
use std::collections::BTreeSet;
use std::sync::OnceLock;

use docflow_engine::{FlowError, FlowResult};

use super::Prompter;
use crate::client::{EmrDirectory, IdentityCandidate, SearchMode};
use crate::settings::{DefaultValues, Prompts};

const NAME_PROMPT: &str = "get_patient_name";
const DOB_PROMPT: &str = "get_patient_dob";
const HIN_PROMPT: &str = "get_patient_hin";
const CONFIRM_PROMPT: &str = "get_patient_result_filter";

const DEFAULT_CONFIRM_INSTRUCTION: &str = "If the patient record above is the patient this \
document is about, reply with that record as JSON with the keys demographicNo, formattedName, \
formattedDob and providerNo. Otherwise reply False.";

/// Longest name answer that is still searched.
const MAX_NAME_TOKENS: usize = 5;

/// Shortest digit run accepted as a health identifier.
const MIN_HIN_DIGITS: usize = 6;

/// Evidence signal used to find a candidate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Signal {
    Hin,
    Dob,
    Name,
}

impl Signal {
    pub fn as_str(&self) -> &'static str {
        match self {
            Signal::Hin => "hin",
            Signal::Dob => "dob",
            Signal::Name => "name",
        }
    }
}

impl std::fmt::Display for Signal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a candidate was accepted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResolutionBasis {
    AllSignals,
    TwoSignals(Signal, Signal),
    Confirmed(Signal),
}

/// Result of identity resolution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IdentityResolution {
    Resolved {
        candidate: IdentityCandidate,
        basis: ResolutionBasis,
    },
    Unresolved,
}

impl IdentityResolution {
    pub fn candidate(&self) -> Option<&IdentityCandidate> {
        match self {
            IdentityResolution::Resolved { candidate, .. } => Some(candidate),
            IdentityResolution::Unresolved => None,
        }
    }
}

/// Per-signal narrowing results.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SignalCandidates {
    pub hin: Option<IdentityCandidate>,
    pub dob: Option<IdentityCandidate>,
    pub name: Option<IdentityCandidate>,
}

impl SignalCandidates {
    fn in_priority(&self) -> [(Signal, Option<&IdentityCandidate>); 3] {
        [
            (Signal::Hin, self.hin.as_ref()),
            (Signal::Dob, self.dob.as_ref()),
            (Signal::Name, self.name.as_ref()),
        ]
    }
}

/// Resolves the patient a document belongs to.
pub struct IdentityResolver<'a> {
    directory: &'a dyn EmrDirectory,
    prompter: Prompter<'a>,
    prompts: &'a Prompts,
}

impl<'a> IdentityResolver<'a> {
    pub fn new(directory: &'a dyn EmrDirectory, prompter: Prompter<'a>, prompts: &'a Prompts) -> Self {
        Self {
            directory,
            prompter,
            prompts,
        }
    }

    /// Resolve the patient for the evidence text.
    pub async fn resolve(&self, evidence: &str) -> FlowResult<IdentityResolution> {
        let signals = self.collect_signals(evidence).await?;
        self.reconcile(evidence, &signals).await
    }

    /// Search every signal and narrow each to at most one candidate.
    pub async fn collect_signals(&self, evidence: &str) -> FlowResult<SignalCandidates> {
        let hin_hits = self.degrade(Signal::Hin, self.hin_hits(evidence).await)?;
        let dob_hits = self.degrade(Signal::Dob, self.dob_hits(evidence).await)?;
        let name_hits = self.degrade(Signal::Name, self.name_hits(evidence).await)?;

        let signals = SignalCandidates {
            hin: narrow(hin_hits, evidence),
            dob: narrow(dob_hits, evidence),
            name: narrow(name_hits, evidence),
        };

        tracing::debug!(
            hin = ?signals.hin.as_ref().map(|c| &c.demographic_no),
            dob = ?signals.dob.as_ref().map(|c| &c.demographic_no),
            name = ?signals.name.as_ref().map(|c| &c.demographic_no),
            "Identity signals narrowed"
        );
        Ok(signals)
    }

    /// Malformed answers or search payloads leave the signal empty.
    fn degrade(
        &self,
        signal: Signal,
        result: FlowResult<Vec<IdentityCandidate>>,
    ) -> FlowResult<Vec<IdentityCandidate>> {
        match result {
            Err(FlowError::Data(msg)) => {
                tracing::warn!(signal = %signal, error = %msg, "Signal unusable");
                Ok(Vec::new())
            }
            other => other,
        }
    }

    /// Apply the reconciliation rules in order.
    pub async fn reconcile(
        &self,
        evidence: &str,
        signals: &SignalCandidates,
    ) -> FlowResult<IdentityResolution> {
        if let (Some(h), Some(d), Some(n)) = (&signals.hin, &signals.dob, &signals.name) {
            if h.demographic_no == d.demographic_no && d.demographic_no == n.demographic_no {
                return Ok(IdentityResolution::Resolved {
                    candidate: h.clone(),
                    basis: ResolutionBasis::AllSignals,
                });
            }
        }

        let ordered = signals.in_priority();
        for (i, (first_signal, first)) in ordered.iter().enumerate() {
            for (second_signal, second) in ordered.iter().skip(i + 1) {
                if let (Some(a), Some(b)) = (first, second) {
                    if a.demographic_no == b.demographic_no {
                        return Ok(IdentityResolution::Resolved {
                            candidate: (*a).clone(),
                            basis: ResolutionBasis::TwoSignals(*first_signal, *second_signal),
                        });
                    }
                }
            }
        }

        for (signal, candidate) in ordered {
            let Some(candidate) = candidate else {
                continue;
            };
            if let Some(confirmed) = self.confirm(evidence, candidate).await? {
                return Ok(IdentityResolution::Resolved {
                    candidate: confirmed,
                    basis: ResolutionBasis::Confirmed(signal),
                });
            }
            tracing::debug!(signal = %signal, demographic_no = %candidate.demographic_no, "Candidate not confirmed");
        }

        Ok(IdentityResolution::Unresolved)
    }

    /// Ask the model to confirm a candidate; the returned identity must match
    /// the candidate and survive a fresh lookup.
    async fn confirm(
        &self,
        evidence: &str,
        candidate: &IdentityCandidate,
    ) -> FlowResult<Option<IdentityCandidate>> {
        let instruction = match self.prompts.get(CONFIRM_PROMPT) {
            "" => DEFAULT_CONFIRM_INSTRUCTION,
            p => p,
        };
        let record = serde_json::to_string(candidate)?;
        let prompt = format!("\n{}.\n{}.\n{}", record, evidence, instruction);
        let answer = self.prompter.ask(&prompt).await?;

        let Some(claimed) = parse_identity_payload(&answer) else {
            return Ok(None);
        };
        if claimed.demographic_no != candidate.demographic_no {
            tracing::warn!(
                expected = %candidate.demographic_no,
                claimed = %claimed.demographic_no,
                "Model confirmed a different patient"
            );
            return Ok(None);
        }
        if !plausible(candidate, evidence) {
            return Ok(None);
        }

        self.verify(&claimed).await
    }

    /// Re-query an identity by demographic number; returns the stored record
    /// only if its name and date of birth match exactly.
    pub async fn verify(&self, claimed: &IdentityCandidate) -> FlowResult<Option<IdentityCandidate>> {
        let hits = self
            .directory
            .search(SearchMode::DemographicNo, &claimed.demographic_no)
            .await?;

        let stored = hits
            .into_iter()
            .find(|c| c.demographic_no == claimed.demographic_no);

        match stored {
            Some(record)
                if record.formatted_dob == claimed.formatted_dob
                    && record.formatted_name == claimed.formatted_name =>
            {
                Ok(Some(record))
            }
            Some(record) => {
                tracing::warn!(
                    demographic_no = %claimed.demographic_no,
                    claimed_dob = %claimed.formatted_dob,
                    stored_dob = %record.formatted_dob,
                    "Rejected stale identity"
                );
                Ok(None)
            }
            None => {
                tracing::warn!(demographic_no = %claimed.demographic_no, "Identity not found in directory");
                Ok(None)
            }
        }
    }

    async fn name_hits(&self, evidence: &str) -> FlowResult<Vec<IdentityCandidate>> {
        let answer = self
            .prompter
            .ask_about(evidence, self.prompts.get(NAME_PROMPT))
            .await?;
        let patterns = name_patterns(&answer);

        let mut hits = Vec::new();
        for pattern in &patterns {
            hits.extend(self.directory.search(SearchMode::Name, pattern).await?);
        }
        Ok(hits)
    }

    async fn dob_hits(&self, evidence: &str) -> FlowResult<Vec<IdentityCandidate>> {
        let answer = self
            .prompter
            .ask_about(evidence, self.prompts.get(DOB_PROMPT))
            .await?;

        let mut hits = Vec::new();
        for date in parse_dates(&answer) {
            let query = date.format("%Y-%m-%d").to_string();
            hits.extend(self.directory.search(SearchMode::Dob, &query).await?);
        }
        Ok(hits)
    }

    async fn hin_hits(&self, evidence: &str) -> FlowResult<Vec<IdentityCandidate>> {
        let answer = self
            .prompter
            .ask_about(evidence, self.prompts.get(HIN_PROMPT))
            .await?;
        let Some(digits) = extract_hin(&answer) else {
            return Ok(Vec::new());
        };

        let hits = self.directory.search(SearchMode::Hin, &digits).await?;
        if !hits.is_empty() {
            return Ok(hits);
        }

        let (left, right) = digits.split_at(digits.len() / 2);
        tracing::debug!(left, right, "Health identifier not found, searching halves");
        let mut hits = self.directory.search(SearchMode::Hin, left).await?;
        hits.extend(self.directory.search(SearchMode::Hin, right).await?);
        Ok(hits)
    }
}

/// Placeholder identity for documents whose patient could not be resolved.
pub fn sentinel_identity(defaults: &DefaultValues) -> IdentityCandidate {
    IdentityCandidate::new(
        defaults
            .get("default_unidentified_patient_tagging_id")
            .unwrap_or_default(),
        defaults
            .get("default_unidentified_patient_tagging_name")
            .unwrap_or_default(),
        defaults
            .get("default_unidentified_patient_tagging_dob")
            .unwrap_or_default(),
        defaults
            .get("default_unidentified_patient_provider_id")
            .unwrap_or_default(),
    )
}

/// Directory search patterns for every ordering of the answered name tokens.
pub fn name_patterns(answer: &str) -> Vec<String> {
    if answer.contains("False") || none_regex().is_match(answer) {
        return Vec::new();
    }

    let mut query = match answer.split_once(':') {
        Some((_, rest)) => rest.trim().to_string(),
        None => answer.trim().to_string(),
    };
    query = query.replace(['.', ','], "");
    if let Some((_, rest)) = query.split_once(" is ") {
        query = rest.to_string();
    }

    let tokens: Vec<&str> = query.split_whitespace().collect();
    if tokens.is_empty() || tokens.len() > MAX_NAME_TOKENS {
        return Vec::new();
    }

    tokens
        .iter()
        .permutations(tokens.len())
        .map(|combo| {
            let rest = combo[1..].iter().map(|t| **t).collect::<Vec<_>>().join("%");
            format!("%{}%,%{}%", combo[0], rest)
        })
        .unique()
        .collect()
}

/// Every date of birth the answer can denote, in search order.
///
/// Numeric `DD-MM-YYYY` dates whose day and month are both at most 12 yield
/// both readings.
pub fn parse_dates(answer: &str) -> Vec<NaiveDate> {
    static ISO: OnceLock<Regex> = OnceLock::new();
    static TEXTUAL: OnceLock<Regex> = OnceLock::new();
    static NUMERIC: OnceLock<Regex> = OnceLock::new();

    let iso = ISO.get_or_init(|| Regex::new(r"\b(\d{4})-(\d{1,2})-(\d{1,2})\b").unwrap());
    let textual = TEXTUAL.get_or_init(|| {
        Regex::new(
            r"(?i)\b(january|february|march|april|may|june|july|august|september|october|november|december|jan|feb|mar|apr|jun|jul|aug|sept|sep|oct|nov|dec)\.?\s+(\d{1,2}),?\s+(\d{4})\b",
        )
        .unwrap()
    });
    let numeric =
        NUMERIC.get_or_init(|| Regex::new(r"\b(\d{1,2})[-/](\d{1,2})[-/](\d{4})\b").unwrap());

    if let Some(c) = iso.captures(answer) {
        let date = ymd(&c[1], &c[2], &c[3]);
        return date.into_iter().collect();
    }

    if let Some(c) = textual.captures(answer) {
        let month = month_number(&c[1]);
        let date = month.and_then(|m| ymd(&c[3], &m.to_string(), &c[2]));
        return date.into_iter().collect();
    }

    if let Some(c) = numeric.captures(answer) {
        let (first, second, year) = (&c[1], &c[2], &c[3]);
        let mut dates = Vec::new();
        // day-month first, month-day second
        if let Some(d) = ymd(year, second, first) {
            dates.push(d);
        }
        if let Some(d) = ymd(year, first, second) {
            if !dates.contains(&d) {
                dates.push(d);
            }
        }
        return dates;
    }

    Vec::new()
}

fn ymd(year: &str, month: &str, day: &str) -> Option<NaiveDate> {
    NaiveDate::from_ymd_opt(year.parse().ok()?, month.parse().ok()?, day.parse().ok()?)
}

fn month_number(name: &str) -> Option<u32> {
    let prefix: String = name.to_lowercase().chars().take(3).collect();
    let months = [
        "jan", "feb", "mar", "apr", "may", "jun", "jul", "aug", "sep", "oct", "nov", "dec",
    ];
    months.iter().position(|m| *m == prefix).map(|i| i as u32 + 1)
}

/// Longest digit run in the answer, ignoring single letters and separators
/// between digits. Runs shorter than six digits are rejected.
pub fn extract_hin(answer: &str) -> Option<String> {
    static SPAN: OnceLock<Regex> = OnceLock::new();
    let span = SPAN.get_or_init(|| Regex::new(r"\d(?:[\s\-./]?[A-Za-z]?[\s\-./]?\d)*").unwrap());

    span.find_iter(answer)
        .map(|m| m.as_str().chars().filter(char::is_ascii_digit).collect::<String>())
        .filter(|digits| digits.len() >= MIN_HIN_DIGITS)
        .max_by_key(|digits| digits.len())
}

/// Returns true if the candidate's name, or failing that its birth year,
/// appears in the evidence text.
pub fn plausible(candidate: &IdentityCandidate, evidence: &str) -> bool {
    let tokens: Vec<&str> = candidate
        .formatted_name
        .split(|c: char| !c.is_alphanumeric() && c != '\'' && c != '-')
        .map(|t| t.trim_matches(|c: char| c == '\'' || c == '-'))
        .filter(|t| !t.is_empty())
        .collect();

    let long: Vec<&str> = tokens
        .iter()
        .copied()
        .filter(|t| t.chars().count() > 3)
        .collect();

    let haystack = evidence.to_lowercase();
    if !long.is_empty() {
        return long.iter().all(|t| contains_word(&haystack, t));
    }

    let matched = tokens.iter().filter(|t| contains_word(&haystack, t)).count();
    if !tokens.is_empty() && matched * 2 > tokens.len() {
        return true;
    }

    let year: String = candidate.formatted_dob.chars().take(4).collect();
    year.len() == 4 && year.chars().all(|c| c.is_ascii_digit()) && contains_word(&haystack, &year)
}

/// Whole-word match of `word` in an already lower-cased haystack.
fn contains_word(haystack: &str, word: &str) -> bool {
    let word = word.to_lowercase();
    if word.is_empty() {
        return false;
    }
    haystack.match_indices(word.as_str()).any(|(at, found)| {
        let before = haystack[..at].chars().next_back();
        let after = haystack[at + found.len()..].chars().next();
        !before.is_some_and(is_word_char) && !after.is_some_and(is_word_char)
    })
}

fn is_word_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_'
}

/// Reduce search hits to the single plausible candidate, if exactly one.
///
/// Hits are de-duplicated and ordered by demographic number first.
pub fn narrow(hits: Vec<IdentityCandidate>, evidence: &str) -> Option<IdentityCandidate> {
    let mut seen = BTreeSet::new();
    let mut unique: Vec<IdentityCandidate> = hits
        .into_iter()
        .filter(|c| seen.insert(c.demographic_no.clone()))
        .collect();
    unique.sort_by(|a, b| compare_demographic(&a.demographic_no, &b.demographic_no));

    let mut plausible_hits = unique.into_iter().filter(|c| plausible(c, evidence));
    match (plausible_hits.next(), plausible_hits.next()) {
        (Some(only), None) => Some(only),
        _ => None,
    }
}

fn compare_demographic(a: &str, b: &str) -> Ordering {
    match (a.parse::<u64>(), b.parse::<u64>()) {
        (Ok(x), Ok(y)) => x.cmp(&y),
        (Ok(_), Err(_)) => Ordering::Less,
        (Err(_), Ok(_)) => Ordering::Greater,
        _ => a.cmp(b),
    }
}

/// Identity JSON embedded in a model answer, if any.
pub fn parse_identity_payload(answer: &str) -> Option<IdentityCandidate> {
    static FENCED: OnceLock<Regex> = OnceLock::new();
    static OBJECT: OnceLock<Regex> = OnceLock::new();

    let fenced = FENCED.get_or_init(|| Regex::new(r"(?s)```(?:json)?\s*(.*?)```").unwrap());
    let object = OBJECT.get_or_init(|| Regex::new(r"(?s)\{.*\}").unwrap());

    let body = fenced
        .captures(answer)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str())
        .unwrap_or(answer);
    let json = object.find(body)?.as_str().replace('\'', "\"");

    serde_json::from_str::<IdentityCandidate>(&json)
        .ok()
        .filter(|c| !c.demographic_no.is_empty())
}

fn none_regex() -> &'static Regex {
    static NONE: OnceLock<Regex> = OnceLock::new();
    NONE.get_or_init(|| Regex::new(r"(?i)\bnone\b").unwrap())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resolve::Sampling;
    use crate::testing::{FakeDirectory, FakePatient, ScriptedModel};

    fn prompts() -> Prompts {
        let mut prompts = Prompts::default();
        prompts.insert(NAME_PROMPT, "NAME?");
        prompts.insert(DOB_PROMPT, "DOB?");
        prompts.insert(HIN_PROMPT, "HIN?");
        prompts.insert(CONFIRM_PROMPT, "CONFIRM?");
        prompts
    }

    async fn resolve(
        directory: &FakeDirectory,
        model: &ScriptedModel,
        evidence: &str,
    ) -> IdentityResolution {
        let prompts = prompts();
        let resolver =
            IdentityResolver::new(directory, Prompter::new(model, Sampling::default()), &prompts);
        resolver.resolve(evidence).await.unwrap()
    }

    #[test]
    fn test_name_patterns_cover_all_orderings() {
        let patterns = name_patterns("The full name of the patient is Smith John.");
        assert_eq!(patterns, vec!["%Smith%,%John%", "%John%,%Smith%"]);

        let patterns = name_patterns("Patient: Mary Ann Lee");
        assert_eq!(patterns.len(), 6);
        assert!(patterns.contains(&"%Lee%,%Mary%Ann%".to_string()));
    }

    #[test]
    fn test_name_patterns_rejections() {
        assert!(name_patterns("False").is_empty());
        assert!(name_patterns("None found").is_empty());
        assert!(name_patterns("a b c d e f").is_empty());
        assert!(name_patterns("   ").is_empty());
    }

    #[test]
    fn test_parse_dates() {
        let d = |y, m, d| NaiveDate::from_ymd_opt(y, m, d).unwrap();

        assert_eq!(parse_dates("DOB: 1980-05-01"), vec![d(1980, 5, 1)]);
        assert_eq!(parse_dates("born March 7, 1975."), vec![d(1975, 3, 7)]);
        assert_eq!(parse_dates("born Sept. 17 1975"), vec![d(1975, 9, 17)]);
        assert_eq!(parse_dates("25/12/1990"), vec![d(1990, 12, 25)]);
        assert_eq!(parse_dates("12-25-1990"), vec![d(1990, 12, 25)]);
        assert_eq!(parse_dates("03-04-1990"), vec![d(1990, 4, 3), d(1990, 3, 4)]);
        assert_eq!(parse_dates("05/05/1990"), vec![d(1990, 5, 5)]);
        assert!(parse_dates("unknown").is_empty());
        assert!(parse_dates("1980-13-01").is_empty());
    }

    #[test]
    fn test_extract_hin() {
        assert_eq!(extract_hin("123456789A"), Some("123456789".to_string()));
        assert_eq!(extract_hin("HCN 1234-567-890 AB"), Some("1234567890".to_string()));
        assert_eq!(extract_hin("12345O6789"), Some("123456789".to_string()));
        assert_eq!(
            extract_hin("DOB 1980-05-01, HIN 1234 567 890"),
            Some("1234567890".to_string())
        );
        assert_eq!(extract_hin("ref 12345"), None);
        assert_eq!(extract_hin("False"), None);
    }

    #[test]
    fn test_plausibility() {
        let evidence = "Lab report for Jane Doerksen, seen on 2024-02-01.";
        let long = IdentityCandidate::new("1", "DOERKSEN, JANE", "1980-05-01", "_");
        assert!(plausible(&long, evidence));

        let wrong = IdentityCandidate::new("2", "DOERKSEN, MARTHA", "1980-05-01", "_");
        assert!(!plausible(&wrong, evidence));

        let short = IdentityCandidate::new("3", "DOE, JO", "1975-01-01", "_");
        assert!(plausible(&short, "Patient Jo Doe"));
        assert!(!plausible(&short, "Patient J. Smith"));
        assert!(plausible(&short, "Patient J. Smith, born 1975"));
    }

    #[test]
    fn test_plausibility_matches_whole_words_only() {
        let candidate = IdentityCandidate::new("4", "DOERKSEN, JANE", "1980-05-01", "_");
        assert!(plausible(&candidate, "RE: JANE DOERKSEN (follow-up)"));
        assert!(!plausible(&candidate, "Jane Doerksenberg"));
        assert!(!plausible(&candidate, "Janet Doerksen"));

        let hyphenated = IdentityCandidate::new("5", "SMITH-JONES, ANNA", "1960-01-01", "_");
        assert!(plausible(&hyphenated, "anna smith-jones"));
    }

    #[test]
    fn test_narrow_requires_exactly_one() {
        let evidence = "Jane Doerksen and John Doerksen";
        let jane = IdentityCandidate::new("7", "DOERKSEN, JANE", "1980-05-01", "_");
        let john = IdentityCandidate::new("3", "DOERKSEN, JOHN", "1982-01-01", "_");
        let other = IdentityCandidate::new("9", "SMITHERS, WAYLON", "1950-01-01", "_");

        assert_eq!(narrow(vec![jane.clone(), other.clone(), jane.clone()], evidence), Some(jane.clone()));
        assert_eq!(narrow(vec![jane, john], evidence), None);
        assert_eq!(narrow(vec![other], evidence), None);
        assert_eq!(narrow(Vec::new(), evidence), None);
    }

    #[test]
    fn test_parse_identity_payload() {
        let answer = "```json\n{'demographicNo': '55', 'formattedName': 'DOE, JO', 'formattedDob': '1980-05-01', 'providerNo': '_'}\n```";
        let parsed = parse_identity_payload(answer).unwrap();
        assert_eq!(parsed.demographic_no, "55");
        assert_eq!(parsed.formatted_dob, "1980-05-01");

        assert!(parse_identity_payload("False").is_none());
        assert!(parse_identity_payload("{\"formattedName\": \"X\"}").is_none());
    }

    #[tokio::test]
    async fn test_name_permutation_completeness() {
        let directory = FakeDirectory::with_patients(vec![FakePatient::new(
            "310", "John", "Smith", "1970-02-02", "5550001112",
        )]);
        let model = ScriptedModel::new().reply("NAME?", "Smith John");
        let evidence = "Consult note. Patient Smith John attended clinic.";

        let prompts = prompts();
        let resolver =
            IdentityResolver::new(&directory, Prompter::new(&model, Sampling::default()), &prompts);
        let signals = resolver.collect_signals(evidence).await.unwrap();

        assert_eq!(signals.name.map(|c| c.demographic_no), Some("310".to_string()));
        let name_searches: Vec<String> = directory
            .search_log()
            .into_iter()
            .filter(|(mode, _)| *mode == SearchMode::Name)
            .map(|(_, q)| q)
            .collect();
        assert_eq!(name_searches, vec!["%Smith%,%John%", "%John%,%Smith%"]);
    }

    #[tokio::test]
    async fn test_ambiguous_dob_searches_both_readings() {
        let directory = FakeDirectory::with_patients(vec![FakePatient::new(
            "77", "Quintero", "Maria", "1990-03-04", "4444444444",
        )]);
        let model = ScriptedModel::new().reply("DOB?", "03-04-1990");
        let evidence = "Maria Quintero, born 03-04-1990.";

        let prompts = prompts();
        let resolver =
            IdentityResolver::new(&directory, Prompter::new(&model, Sampling::default()), &prompts);
        let signals = resolver.collect_signals(evidence).await.unwrap();

        let dob_searches: Vec<String> = directory
            .search_log()
            .into_iter()
            .filter(|(mode, _)| *mode == SearchMode::Dob)
            .map(|(_, q)| q)
            .collect();
        assert_eq!(dob_searches, vec!["%1990-04-03%", "%1990-03-04%"]);
        assert_eq!(signals.dob.map(|c| c.demographic_no), Some("77".to_string()));
    }

    #[tokio::test]
    async fn test_two_signals_outvote_third() {
        let directory = FakeDirectory::with_patients(vec![
            FakePatient::new("1042", "Doerksen", "Jane", "1980-05-01", "1111111111"),
            FakePatient::new("9999", "Abernathy", "Clark", "1955-09-09", "2222222222"),
        ]);
        let model = ScriptedModel::new()
            .reply("NAME?", "Jane Doerksen")
            .reply("DOB?", "1980-05-01")
            .reply("HIN?", "2222222222");
        let evidence = "Jane Doerksen, DOB 1980-05-01. Referred by Clark Abernathy. HCN 2222222222";

        let resolution = resolve(&directory, &model, evidence).await;
        assert_eq!(
            resolution,
            IdentityResolution::Resolved {
                candidate: directory.patients[0].candidate.clone(),
                basis: ResolutionBasis::TwoSignals(Signal::Dob, Signal::Name),
            }
        );
    }

    #[tokio::test]
    async fn test_all_signals_agree() {
        let directory = FakeDirectory::with_patients(vec![FakePatient::new(
            "1042", "Doerksen", "Jane", "1980-05-01", "1111111111",
        )]);
        let model = ScriptedModel::new()
            .reply("NAME?", "Jane Doerksen")
            .reply("DOB?", "May 1, 1980")
            .reply("HIN?", "1111111111 XY");
        let evidence = "Jane Doerksen, DOB May 1, 1980, HCN 1111111111 XY";

        let resolution = resolve(&directory, &model, evidence).await;
        assert!(matches!(
            resolution,
            IdentityResolution::Resolved { basis: ResolutionBasis::AllSignals, .. }
        ));
    }

    #[tokio::test]
    async fn test_hin_bisection_and_confirmation() {
        let directory = FakeDirectory::with_patients(vec![FakePatient::new(
            "55", "Doe", "Jo", "1980-05-01", "123456789",
        )]);
        // OCR garbled the last digit; the left half still matches.
        let model = ScriptedModel::new()
            .reply("CONFIRM?", r#"{"demographicNo": "55", "formattedName": "DOE, JO", "formattedDob": "1980-05-01", "providerNo": "_"}"#)
            .reply("HIN?", "123456780");
        let evidence = "Patient Jo Doe. Health card 123456780.";

        let resolution = resolve(&directory, &model, evidence).await;
        assert_eq!(
            resolution.candidate().map(|c| c.demographic_no.as_str()),
            Some("55")
        );

        let hin_searches: Vec<String> = directory
            .search_log()
            .into_iter()
            .filter(|(mode, _)| *mode == SearchMode::Hin)
            .map(|(_, q)| q)
            .collect();
        assert_eq!(hin_searches, vec!["%123456780%", "%1234%", "%56780%"]);
    }

    #[tokio::test]
    async fn test_unconfirmed_single_signal_is_unresolved() {
        let directory = FakeDirectory::with_patients(vec![FakePatient::new(
            "55", "Doe", "Jo", "1980-05-01", "123456789",
        )]);
        let model = ScriptedModel::new().reply("HIN?", "123456789");
        let evidence = "Patient Jo Doe. Health card 123456789.";

        let resolution = resolve(&directory, &model, evidence).await;
        assert_eq!(resolution, IdentityResolution::Unresolved);
    }

    #[tokio::test]
    async fn test_stale_identity_rejected() {
        let claimed = IdentityCandidate::new("77", "DOE, JO", "1980-05-01", "_");
        let directory = FakeDirectory {
            lookup_override: vec![IdentityCandidate::new("77", "DOE, JO", "1980-06-01", "_")],
            ..FakeDirectory::default()
        };
        let model = ScriptedModel::new();
        let prompts = prompts();
        let resolver =
            IdentityResolver::new(&directory, Prompter::new(&model, Sampling::default()), &prompts);

        assert_eq!(resolver.verify(&claimed).await.unwrap(), None);

        let directory = FakeDirectory {
            lookup_override: vec![claimed.clone()],
            ..FakeDirectory::default()
        };
        let resolver =
            IdentityResolver::new(&directory, Prompter::new(&model, Sampling::default()), &prompts);
        assert_eq!(resolver.verify(&claimed).await.unwrap(), Some(claimed));
    }

    #[tokio::test]
    async fn test_resolution_is_deterministic() {
        let directory = FakeDirectory::with_patients(vec![
            FakePatient::new("20", "Doerksen", "Jane", "1980-05-01", "1111111111"),
            FakePatient::new("3", "Doerksen", "Janet", "1980-05-01", "3333333333"),
        ]);
        let model = ScriptedModel::new()
            .reply("NAME?", "Jane Doerksen")
            .reply("DOB?", "1980-05-01");
        let evidence = "Jane Doerksen 1980-05-01";

        let first = resolve(&directory, &model, evidence).await;
        for _ in 0..3 {
            assert_eq!(resolve(&directory, &model, evidence).await, first);
        }
    }

    #[test]
    fn test_sentinel_identity() {
        let mut defaults = DefaultValues::default();
        defaults.insert("default_unidentified_patient_tagging_id", "1");
        defaults.insert("default_unidentified_patient_tagging_name", "UNIDENTIFIED, PATIENT");
        defaults.insert("default_unidentified_patient_tagging_dob", "1900-01-01");

        let sentinel = sentinel_identity(&defaults);
        assert_eq!(sentinel.demographic_no, "1");
        assert_eq!(sentinel.formatted_name, "UNIDENTIFIED, PATIENT");
        assert_eq!(sentinel.mrp(), None);
    }
}
