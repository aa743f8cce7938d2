// Prompt construction for outreach enhancement.
// Input budget: system ~150 tokens, context ~200, instructions ~100.

use std::collections::HashSet;

use crate::enhancement::EnhancementInput;

/// System prompt shared by every provider.
pub const SYSTEM_PROMPT: &str = "You are a career advisor writing a targeted job outreach email \
    on behalf of a candidate. Write a concise, specific, and compelling email that references \
    real experience from the candidate's background, not generic phrases. \
    The candidate may be in any field: technology, healthcare, education, finance, trades, or any other profession. \
    CRITICAL: Only reference experience, skills, and achievements that appear in the provided resume signals. \
    Do NOT invent metrics, percentages, project names, or accomplishments not explicitly present in the input. \
    Never use filler language like \"I am excited\", \"I am passionate\", or \"I would love to\". \
    Write in first person, professional tone, 150-200 words total (subject line excluded).";

const MAX_CONTEXT_CHARS: usize = 150;
const MAX_MATCHED_KEYWORDS: usize = 5;
const MAX_MATCHED_PHRASES: usize = 3;
const MAX_HIGHLIGHTS: usize = 5;
const MAX_GAPS: usize = 3;

/// Assembles the user-turn prompt from job context, resume signals, and gap analysis.
pub fn build_enhance_prompt(input: EnhancementInput<'_>) -> String {
    let EnhancementInput { job, resume, gap } = input;

    let company_context = company_context(&job.description);

    let matched_kw: Vec<&str> = gap
        .matched_keywords
        .iter()
        .take(MAX_MATCHED_KEYWORDS)
        .map(String::as_str)
        .collect();
    let matched_ph: Vec<&str> = gap
        .matched_phrases
        .iter()
        .take(MAX_MATCHED_PHRASES)
        .map(String::as_str)
        .collect();

    let job_signals: Vec<&str> = matched_kw.iter().chain(matched_ph.iter()).copied().collect();
    let job_signals_str = join_or(&job_signals, "(none detected)");

    // Highlights: keyword-stream entries the job also asks for, strongest first.
    let signal_set: HashSet<&str> = job_signals.iter().copied().collect();
    let mut highlights: Vec<&str> = resume
        .keyword_stream
        .iter()
        .map(String::as_str)
        .filter(|k| signal_set.contains(k))
        .collect();
    highlights.sort_by(|a, b| {
        let wa = resume.keyword_weights.get(*a).copied().unwrap_or(0.0);
        let wb = resume.keyword_weights.get(*b).copied().unwrap_or(0.0);
        wb.total_cmp(&wa)
    });
    if highlights.is_empty() {
        highlights = resume
            .keyword_stream
            .iter()
            .take(MAX_HIGHLIGHTS)
            .map(String::as_str)
            .collect();
    }
    highlights.truncate(MAX_HIGHLIGHTS);
    let highlights_str = join_or(&highlights, "(see resume summary)");

    let gaps: Vec<&str> = gap
        .missing_keywords
        .iter()
        .take(MAX_GAPS)
        .map(String::as_str)
        .collect();
    let gaps_str = join_or(&gaps, "(none)");

    let title = non_empty_or(&job.title, "the position");
    let company = non_empty_or(&job.company, "the company");
    let greeting = non_empty_or(&job.company, "team");
    let fit_pct = (gap.fit_score.clamp(0.0, 1.0) * 100.0).round() as u32;

    format!(
        "Write a targeted outreach email for the following job. Use the resume signals to make it specific.\n\
         \n\
         JOB DETAILS:\n\
         - Title: {title}\n\
         - Company: {company}\n\
         - Context: {company_context}\n\
         - Estimated fit: {fit_pct}%\n\
         \n\
         MATCHED SIGNALS (skills/phrases the job and resume share):\n\
         {job_signals_str}\n\
         \n\
         CANDIDATE RESUME HIGHLIGHTS (relevant to this role):\n\
         {highlights_str}\n\
         \n\
         GAPS (the job asks for these; do NOT claim them):\n\
         {gaps_str}\n\
         \n\
         REQUIREMENTS:\n\
         - Reference at least 2 specific professional signals from the resume in the opening paragraph\n\
         - Do NOT include a subject line; write body only (start with \"Hi {greeting},\" or similar)\n\
         - 150-200 words\n\
         - No filler phrases (\"excited to\", \"passionate about\", \"would love to\")\n\
         - End with a clear, low-pressure call to action\n\
         - CRITICAL: Do NOT invent metrics, percentages, achievements, or project names. Only use what is in the resume signals above."
    )
}

/// Rough token estimate at ~4 chars per token.
pub fn estimate_token_count(text: &str) -> usize {
    text.len() / 4
}

/// First sentence of the description, capped at 150 chars.
fn company_context(description: &str) -> String {
    let first = description.trim().split('.').next().unwrap_or("").trim();
    if first.chars().count() > MAX_CONTEXT_CHARS {
        let cut: String = first.chars().take(MAX_CONTEXT_CHARS).collect();
        format!("{cut}…")
    } else {
        first.to_string()
    }
}

fn join_or(items: &[&str], fallback: &str) -> String {
    if items.is_empty() {
        fallback.to_string()
    } else {
        items.join(", ")
    }
}

fn non_empty_or<'a>(value: &'a str, fallback: &'a str) -> &'a str {
    if value.trim().is_empty() {
        fallback
    } else {
        value
    }
}
