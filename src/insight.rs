//! Heuristic query analysis and answer enrichment.
//!
//! Keyword tables and thresholds here are tuning knobs, not contracts.

use std::sync::LazyLock;

use regex::Regex;
use serde::Serialize;

use crate::pipeline::{QueryResponse, SourceRef};

const BASE_CONFIDENCE: f64 = 0.8;
const MAX_FOLLOW_UPS: usize = 3;
const MAX_RELATED_TOPICS: usize = 5;
const MAX_ACTION_ITEMS: usize = 4;

const VAGUE_THRESHOLD: usize = 2;

static COURSE_CODE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\b[a-z]{2,4} ?\d{3,4}\b").unwrap());

static VAGUE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)\b(?:good|best|easy|hard|nice|bad|better|some|any|things|stuff|etc|and so on)\b",
    )
    .unwrap()
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Topic {
    Jobs,
    Courses,
    CampusLocation,
}

impl Topic {
    pub const ALL: [Topic; 3] = [Topic::Jobs, Topic::Courses, Topic::CampusLocation];

    /// Word prefixes that signal the topic.
    fn keywords(self) -> &'static [&'static str] {
        match self {
            Topic::Jobs => &["job", "work", "employ", "career", "hiring"],
            Topic::Courses => &["course", "class", "grade", "professor"],
            Topic::CampusLocation => &["campus", "location", "where", "building"],
        }
    }

    /// Words that make a question about the topic concrete enough to answer.
    fn specifics(self) -> &'static [&'static str] {
        match self {
            Topic::Jobs => &["on-campus", "off-campus", "campus", "internship", "research", "food"],
            Topic::Courses => &[],
            Topic::CampusLocation => &["main", "downtown", "north", "south", "east", "west", "online"],
        }
    }

    fn clarification(self) -> ClarificationQuestion {
        let (question, options): (&str, &[&str]) = match self {
            Topic::Jobs => (
                "What type of job are you looking for?",
                &[
                    "On-campus student worker",
                    "Off-campus part-time",
                    "Internship",
                    "Research position",
                    "Food service",
                    "Administrative or office work",
                ],
            ),
            Topic::Courses => (
                "What specific course or subject are you asking about?",
                &[
                    "Course grades and difficulty",
                    "Professor ratings and reviews",
                    "Course recommendations",
                    "Grade distributions",
                ],
            ),
            Topic::CampusLocation => (
                "Which campus are you referring to?",
                &["Main campus", "Downtown campus", "Satellite campus", "Online"],
            ),
        };
        ClarificationQuestion {
            question: question.to_string(),
            options: options.iter().map(|o| o.to_string()).collect(),
            context: format!("To provide better information about {self}"),
            field: self,
        }
    }
}

impl std::fmt::Display for Topic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Topic::Jobs => "jobs",
            Topic::Courses => "courses",
            Topic::CampusLocation => "campus locations",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClarificationQuestion {
    pub question: String,
    pub options: Vec<String>,
    pub context: String,
    pub field: Topic,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueryAnalysis {
    pub needs_clarification: bool,
    pub detected_topics: Vec<Topic>,
    pub clarification_questions: Vec<ClarificationQuestion>,
    pub confidence: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EnhancedResponse {
    pub answer: String,
    pub sources: Vec<SourceRef>,
    pub follow_up_questions: Vec<String>,
    pub related_topics: Vec<String>,
    pub action_items: Vec<String>,
    /// In `[0, 1]`.
    pub confidence: f64,
    pub needs_clarification: bool,
    pub clarification_questions: Vec<ClarificationQuestion>,
}

/// Lowercased words of `text`, keeping hyphens inside words.
fn words(text: &str) -> Vec<String> {
    text.to_lowercase()
        .split(|c: char| !(c.is_alphanumeric() || c == '-'))
        .filter(|w| !w.is_empty())
        .map(str::to_string)
        .collect()
}

fn mentions(words: &[String], prefixes: &[&str]) -> bool {
    words
        .iter()
        .any(|w| prefixes.iter().any(|p| w.starts_with(p)))
}

/// Whether `text` contains something shaped like a course code: 2 to 4
/// letters then 3 or 4 digits, optionally separated by one space
/// (`CSE 110`, `mat265`).
pub fn has_course_code(text: &str) -> bool {
    COURSE_CODE_RE.is_match(text)
}

fn is_specific(topic: Topic, question: &str, words: &[String]) -> bool {
    match topic {
        Topic::Courses => has_course_code(question),
        _ => words.iter().any(|w| topic.specifics().contains(&w.as_str())),
    }
}

pub fn detect_topics(question: &str) -> Vec<Topic> {
    let words = words(question);
    Topic::ALL
        .into_iter()
        .filter(|t| mentions(&words, t.keywords()))
        .collect()
}

/// Decide whether `question` is too vague to answer well.
pub fn analyze(question: &str) -> QueryAnalysis {
    let words = words(question);
    let mut confidence = BASE_CONFIDENCE;
    let mut needs_clarification = false;

    let vague = VAGUE_RE.find_iter(question).count();
    if vague > VAGUE_THRESHOLD {
        needs_clarification = true;
        confidence -= 0.3;
    }

    let detected_topics = detect_topics(question);
    let clarification_questions: Vec<_> = detected_topics
        .iter()
        .filter(|t| !is_specific(**t, question, &words))
        .map(|t| t.clarification())
        .collect();
    needs_clarification |= !clarification_questions.is_empty();

    QueryAnalysis {
        needs_clarification,
        detected_topics,
        clarification_questions,
        confidence,
    }
}

fn follow_up_questions(words: &[String]) -> Vec<String> {
    let mut out: Vec<&str> = Vec::new();
    if mentions(words, &["job", "work"]) {
        out.extend([
            "What's your major? It helps narrow down relevant openings.",
            "Are you looking for on-campus or off-campus positions?",
            "What schedule works for you: weekdays, weekends or evenings?",
        ]);
    }
    if mentions(words, &["course", "grade"]) {
        out.extend([
            "Which semester are you planning to take this course?",
            "Are you more interested in professor ratings or grade distributions?",
            "Do you want to know about a specific section or professor?",
        ]);
    }
    if mentions(words, &["professor"]) {
        out.extend([
            "Which courses does this professor teach?",
            "Are you after teaching style or grading information?",
        ]);
    }
    out.into_iter().take(MAX_FOLLOW_UPS).map(str::to_string).collect()
}

fn related_topics(words: &[String]) -> Vec<String> {
    let mut out: Vec<&str> = Vec::new();
    if mentions(words, &["job"]) {
        out.extend([
            "Career Services",
            "Student Employment Office",
            "Internship Opportunities",
            "Resume Building",
        ]);
    }
    if mentions(words, &["course", "grade"]) {
        out.extend([
            "Course Registration Tips",
            "Choosing Professors",
            "GPA Information",
            "Academic Advising",
        ]);
    }
    if mentions(words, &["campus"]) {
        out.extend(["Campus Resources", "Student Life", "Campus Events", "Student Organizations"]);
    }
    out.into_iter()
        .take(MAX_RELATED_TOPICS)
        .map(str::to_string)
        .collect()
}

fn action_items(words: &[String]) -> Vec<String> {
    let mut out: Vec<&str> = Vec::new();
    if mentions(words, &["job"]) {
        out.extend([
            "Check the student jobs board regularly",
            "Contact your department's administrative office",
            "Visit the career services office",
            "Update your resume and cover letter",
        ]);
    }
    if mentions(words, &["course"]) {
        out.extend([
            "Check the registration calendar",
            "Read recent reviews of the professors teaching it",
            "Talk to an academic advisor",
            "Review the course syllabus and prerequisites",
        ]);
    }
    out.into_iter().take(MAX_ACTION_ITEMS).map(str::to_string).collect()
}

/// How much to trust an answer, from its sources and length.
pub fn confidence(response: &QueryResponse) -> f64 {
    let mut confidence = BASE_CONFIDENCE;
    match response.sources.len() {
        0 => confidence -= 0.3,
        n if n >= 3 => confidence += 0.1,
        _ => {}
    }
    let len = response.answer.chars().count();
    if len > 200 {
        confidence += 0.1;
    } else if len < 50 {
        confidence -= 0.2;
    }
    confidence.clamp(0.0, 1.0)
}

/// Add follow-ups, related topics, action items and a confidence to a
/// pipeline answer.
pub fn enhance(response: &QueryResponse) -> EnhancedResponse {
    let words = words(&response.question);
    let analysis = analyze(&response.question);
    EnhancedResponse {
        answer: response.answer.clone(),
        sources: response.sources.clone(),
        follow_up_questions: follow_up_questions(&words),
        related_topics: related_topics(&words),
        action_items: action_items(&words),
        confidence: confidence(response),
        needs_clarification: analysis.needs_clarification,
        clarification_questions: analysis.clarification_questions,
    }
}
