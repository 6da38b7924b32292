use crate::error::ParseError;
use once_cell::sync::Lazy;
use regex::Regex;
use std::fmt;
use std::path::Path;
use std::str::FromStr;

static DIGITS: Lazy<Regex> = Lazy::new(|| Regex::new(r"\d+").unwrap());
static MEETING: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)^meet\s*(\d+)\s*([a-z])?$").unwrap());
static THERAPY_STAGE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)ECG_([a-z])").unwrap());

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum State {
    Baseline,
    Therapy,
    Recovery,
}

impl State {
    pub fn as_str(&self) -> &'static str {
        match self {
            State::Baseline => "baseline",
            State::Therapy => "therapy",
            State::Recovery => "recovery",
        }
    }
}

impl fmt::Display for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for State {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "baseline" => Ok(State::Baseline),
            "therapy" => Ok(State::Therapy),
            "recovery" => Ok(State::Recovery),
            _ => Err(ParseError::State(s.to_string())),
        }
    }
}

/// Sub-stage letter of a therapy recording (`ECG_A` → `A`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TherapyStage(char);

impl TherapyStage {
    pub fn from_file_name(name: &str) -> Option<TherapyStage> {
        THERAPY_STAGE
            .captures(name)
            .and_then(|c| c[1].chars().next())
            .map(|c| TherapyStage(c.to_ascii_uppercase()))
    }

    pub fn letter(&self) -> char {
        self.0
    }
}

/// How the therapy stage is reported in the `state` column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StateStyle {
    /// `therapy`, with the stage letter in its own column.
    #[default]
    Split,
    /// `therapy_a`, `therapy_b`, ...
    Merged,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionPath {
    pub subject: String,
    pub subject_id: u32,
    pub meeting: String,
    pub meeting_number: u32,
    pub meeting_suffix: Option<char>,
    pub state: State,
    pub therapy_stage: Option<TherapyStage>,
    pub file_name: String,
}

impl SessionPath {
    /// Parses `.../subject <N>/meet <N>[a]/<state>/<file>`.
    pub fn parse(path: &Path) -> Result<SessionPath, ParseError> {
        let parts: Vec<&str> = path
            .components()
            .map(|c| {
                c.as_os_str()
                    .to_str()
                    .ok_or_else(|| ParseError::NonUtf8(path.to_path_buf()))
            })
            .collect::<Result<_, _>>()?;
        if parts.len() < 4 {
            return Err(ParseError::TooShallow(path.to_path_buf()));
        }
        let n = parts.len();
        let (subject, meeting, state, file_name) = (parts[n - 4], parts[n - 3], parts[n - 2], parts[n - 1]);

        let subject_id = DIGITS
            .find(subject)
            .and_then(|m| m.as_str().parse::<u32>().ok())
            .ok_or_else(|| ParseError::Subject(subject.to_string()))?;

        let caps = MEETING
            .captures(meeting.trim())
            .ok_or_else(|| ParseError::Meeting(meeting.to_string()))?;
        let meeting_number = caps[1]
            .parse::<u32>()
            .map_err(|_| ParseError::Meeting(meeting.to_string()))?;
        let meeting_suffix = caps.get(2).and_then(|m| m.as_str().chars().next());

        let state: State = state.parse()?;
        let therapy_stage = match state {
            State::Therapy => TherapyStage::from_file_name(file_name),
            _ => None,
        };

        Ok(SessionPath {
            subject: subject.to_string(),
            subject_id,
            meeting: meeting.to_string(),
            meeting_number,
            meeting_suffix,
            state,
            therapy_stage,
            file_name: file_name.to_string(),
        })
    }

    pub fn state_label(&self, style: StateStyle) -> String {
        match (style, self.therapy_stage) {
            (StateStyle::Merged, Some(stage)) => {
                format!("{}_{}", self.state, stage.letter().to_ascii_lowercase())
            }
            _ => self.state.to_string(),
        }
    }

    pub fn stage_label(&self) -> String {
        self.therapy_stage
            .map(|s| s.letter().to_string())
            .unwrap_or_default()
    }
}

/// First run of digits in a meeting label (`meet 12a` → 12).
pub fn meeting_number(text: &str) -> Option<u32> {
    DIGITS.find(text).and_then(|m| m.as_str().parse().ok())
}

/// Numeric id of a subject label (`subject 12` → 12, `12` → 12).
pub fn subject_number(text: &str) -> Option<u32> {
    DIGITS.find(text.trim()).and_then(|m| m.as_str().parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn parses_therapy_path() {
        let p = PathBuf::from("data/subject 12/meet 3a/Therapy/rec_ECG_b_hrv.csv");
        let s = SessionPath::parse(&p).unwrap();
        assert_eq!(s.subject, "subject 12");
        assert_eq!(s.subject_id, 12);
        assert_eq!(s.meeting_number, 3);
        assert_eq!(s.meeting_suffix, Some('a'));
        assert_eq!(s.state, State::Therapy);
        assert_eq!(s.stage_label(), "B");
        assert_eq!(s.state_label(StateStyle::Merged), "therapy_b");
        assert_eq!(s.state_label(StateStyle::Split), "therapy");
    }

    #[test]
    fn stage_only_for_therapy() {
        let p = PathBuf::from("subject 1/meet 1/baseline/x_ECG_A.csv");
        let s = SessionPath::parse(&p).unwrap();
        assert_eq!(s.therapy_stage, None);
        assert_eq!(s.state_label(StateStyle::Merged), "baseline");
    }

    #[test]
    fn rejects_malformed_paths() {
        assert!(matches!(
            SessionPath::parse(Path::new("meet 1/baseline/x.csv")),
            Err(ParseError::TooShallow(_))
        ));
        assert!(matches!(
            SessionPath::parse(Path::new("subject x/meet 1/baseline/x.csv")),
            Err(ParseError::Subject(_))
        ));
        assert!(matches!(
            SessionPath::parse(Path::new("subject 2/session 1/baseline/x.csv")),
            Err(ParseError::Meeting(_))
        ));
        assert!(matches!(
            SessionPath::parse(Path::new("subject 2/meet 1/rest/x.csv")),
            Err(ParseError::State(_))
        ));
    }

    #[test]
    fn meeting_number_extracts_digits() {
        assert_eq!(meeting_number("meet 12a"), Some(12));
        assert_eq!(meeting_number("meet 1-3 median"), Some(1));
        assert_eq!(meeting_number("pilot"), None);
    }
}
