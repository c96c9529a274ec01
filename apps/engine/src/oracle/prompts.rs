// Prompt constants for the field oracle.

/// System prompt for form-field extraction.
pub const FIELD_RESOLVE_SYSTEM: &str =
    "You are an expert at reading job application forms from raw HTML. \
    You map every input control to a stable field name and a locator that finds it. \
    You MUST respond with valid JSON only. \
    Do NOT include any text outside the JSON object. \
    Do NOT use markdown code fences.";

/// Field extraction prompt. Replace `{ats_type}`, `{chunk_num}`, `{total_chunks}`,
/// `{profile_json}`, `{known_fields}` and `{chunk}` before sending.
pub const FIELD_RESOLVE_PROMPT_TEMPLATE: &str = r#"You are analysing part {chunk_num} of {total_chunks} of a {ats_type} job application page.

Applicant facts:
{profile_json}

Fields already located (do NOT describe these again): {known_fields}

Return a JSON object with this EXACT schema:
{
  "fields": [
    {
      "name": "email",
      "label": "Email address",
      "locator": {"kind": "css", "value": "input#email"},
      "kind": "email",
      "value": "ada@example.com",
      "required": true,
      "confidence": 0.95,
      "category": "profile",
      "options": []
    }
  ],
  "unresolved": ["short description of any control you could not map"]
}

Rules:
- "name": snake_case. Use first_name, last_name, full_name, email, phone, linkedin, github, website,
  location, city, state, resume, cover_letter for standard fields. Derive a short snake_case name otherwise.
- "locator.kind": one of css, xpath, id, name. Prefer id, then name, then a CSS selector. Never invent attributes.
- "kind": one of text, email, tel, url, textarea, select, checkbox, radio, file, submit.
- "value": the applicant fact that belongs in the field, or null if the facts do not cover it.
  Leave file inputs null.
- "category": profile (answerable from the facts or documents), free_text (open question),
  yes_no, or demographic (gender, race, ethnicity, veteran, disability and similar voluntary disclosures).
- "options": visible option labels for select and radio groups, otherwise [].
- "confidence": 0.0 to 1.0, how sure you are the locator addresses this field.
- Include the submit button with kind "submit" if this part contains it.
- Only describe controls that appear in the HTML below.

HTML:
{chunk}"#;

/// System prompt for answering application questions.
pub const QUESTION_SYSTEM: &str =
    "You are filling in a job application on behalf of the applicant. \
    Answer truthfully from the facts provided, concisely and professionally. \
    You MUST respond with valid JSON only. \
    Do NOT use markdown code fences.";

/// Question prompt. Replace `{question}`, `{category}`, `{options}`,
/// `{profile_json}` and `{job_json}` before sending.
pub const QUESTION_PROMPT_TEMPLATE: &str = r#"Application question: {question}
Question type: {category}
Allowed options (pick exactly one verbatim if non-empty): {options}

Applicant facts:
{profile_json}

Job:
{job_json}

Return a JSON object: {"answer": "..."}
Keep free-text answers under 500 characters. For yes/no questions answer "Yes" or "No"."#;
