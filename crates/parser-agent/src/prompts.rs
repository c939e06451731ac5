//! Generation prompt
//!
//! The feedback block comes first so the model reads the correction before
//! the (unchanging) task description.

use repair_loop::{render_history, GenerationRequest, SemanticType};

pub const SYSTEM_ROLE: &str = "You are a Python coding expert.";

fn type_note(semantic_type: SemanticType) -> &'static str {
    match semantic_type {
        SemanticType::Date => "date, keep the text format used in the expected output",
        SemanticType::Text => "text",
        SemanticType::Float => "float; strip thousands separators, empty cells become NaN",
    }
}

/// Build the full prompt for one generation attempt.
pub fn generation_prompt(request: &GenerationRequest<'_>) -> String {
    let spec = request.spec;
    let mut prompt = format!(
        "{} Generate a complete, working PDF parser for {} bank statements.\n",
        SYSTEM_ROLE,
        spec.target_name().to_uppercase()
    );

    let history = render_history(request.feedback);
    if !history.is_empty() {
        prompt.push('\n');
        prompt.push_str(&history);
        prompt.push_str("Fix the issues above; try a different approach if the same fix failed before.\n");
    }

    prompt.push_str("\nREQUIREMENTS:\n");
    prompt.push_str("1. Function signature: parse(pdf_path: str) -> pd.DataFrame\n");
    prompt.push_str(&format!(
        "2. Return a DataFrame with exactly these columns, in this order: {}\n",
        spec.ordered_columns()
    ));
    prompt.push_str("3. Column types:\n");
    for column in spec.schema() {
        prompt.push_str(&format!(
            "   - {} ({})\n",
            column.name,
            type_note(column.semantic_type)
        ));
    }
    prompt.push_str("4. Use pdfplumber as the primary library (import pdfplumber)\n");
    prompt.push_str("5. Never read from stdin or wait for input; the parser runs unattended under a time limit\n");
    prompt.push_str("6. Include type hints and docstrings\n");

    let summary = request.summary.render();
    if !summary.is_empty() {
        prompt.push_str("\nPDF analysis:\n");
        prompt.push_str(&summary);
    }

    prompt.push_str(
        "\nCRITICAL: The returned DataFrame MUST match the expected CSV exactly \
         (same columns, same order, same values).\n\
         Generate ONLY the Python code for the parser file. Include all necessary imports.\n\
         Start with imports, then define the parse function.\n",
    );
    prompt.push_str(&format!(
        "This is attempt {}. Generate the complete working code now:",
        request.attempt
    ));

    prompt
}
