// Built-in prompt templates, one per pipeline stage.
// Placeholders in braces are filled by the orchestrator before each call.

/// Shared system prompt: every stage answers in JSON only.
pub const JSON_ONLY_SYSTEM: &str =
    "You are the preference analysis component of a menu recommendation service. \
    You MUST respond with valid JSON only. \
    Do NOT include any text outside the JSON value. \
    Do NOT use markdown code fences.";

/// Extraction: `{history}`, `{request}`
pub const EXTRACTION_TEMPLATE: &str = r#"Conversation so far:
{history}

Latest user request:
{request}

Extract what the user wants from the menu. Return a JSON object with this EXACT schema:
{
  "objective": "one sentence describing what the user is looking for",
  "preferences": [
    {"name": "spicy food", "polarity": "like", "strength": 1.0}
  ],
  "constraints": [
    {"name": "pork", "polarity": "dislike"}
  ]
}

Rules:
- "preferences" are things the user would enjoy or rather avoid; they shape the ranking.
- "constraints" are absolute: "like" means every dish MUST have it, "dislike" means no dish may have it.
- "polarity" is "like" or "dislike". "strength" is optional and defaults to 1.
- Use the user's own words for "name". Return empty arrays when nothing applies."#;

/// Match: `{candidates}`, `{schema}`
pub const MATCH_TEMPLATE: &str = r#"Map each candidate feature onto the closest database feature.

Candidate features:
{candidates}

Database features:
{schema}

Return a JSON array with one entry per candidate:
[
  {"feature": "pork", "db_name": "has_pork"}
]

Use the candidate text exactly as given for "feature". "db_name" MUST be copied verbatim from the
database features, or be the string "none" when no database feature fits."#;

/// Categorize: `{objective}`, `{features}`
pub const CATEGORIZE_TEMPLATE: &str = r#"The user is looking for: {objective}

Matched features:
{features}

Decide for each feature whether it is a hard "constraint" or a soft "preference", and how
strongly it counts. Return a JSON array:
[
  {"feature": "has_pork", "kind": "hard", "category": "constraint", "pref": 0},
  {"feature": "is_spicy", "kind": "soft", "category": "preference", "pref": 1.5}
]

Copy "kind" from the matched feature so repeated features stay distinct.
For a constraint, "pref" is 1 when the feature is required and 0 when it is excluded.
For a preference, "pref" is positive when liked and negative when disliked; its size is the weight."#;

/// Recommend: `{history}`, `{objective}`, `{recommendations}`, `{status}`
pub const RECOMMEND_TEMPLATE: &str = r#"Conversation so far:
{history}

The user is looking for: {objective}

Dishes selected by the optimizer, best first:
{recommendations}

Selection status: {status}

Write a short, friendly reply presenting these dishes in order. If the status is "partial" or
"empty_catalog", say that fewer dishes than requested satisfy the user's requirements.
Return a JSON object:
{"summary": "your reply"}"#;
