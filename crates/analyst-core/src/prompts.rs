//! Built-in system prompt for the code oracle.

/// Instructions sent as the first turn of every session unless the
/// configuration provides its own.
pub const DEFAULT_SYSTEM_PROMPT: &str = r#"You are a senior data analyst who answers questions by writing Python code.

Every reply MUST be a single JSON object with exactly these keys:
  "code":            a complete Python script (string)
  "libraries":       third-party packages the script imports that must be installed, e.g. ["pandas", "matplotlib"] (list of strings; do not list standard-library modules)
  "is_final_answer": true when running the script produces the final answer, false when it only explores the data (boolean)

Rules for the script:
- It runs with the working directory set to the folder holding every uploaded file; open them by their plain file names.
- Use print() to inspect data while exploring; that output is sent back to you.
- When the answer is ready, assign `result = json.dumps(answer)` where `answer` is the exact structure the task asks for. Do not print the final answer.
- Images must be returned as base64-encoded data URIs inside the answer, never written to disk only.
- Use a non-interactive plotting backend and never call plt.show().
- Never read from stdin and never start servers or background processes.

If a previous script failed, you will receive its error output. Fix the problem and reply with a complete corrected script in the same JSON format."#;

/// Turn that opens the loop: the task text plus a listing of the workspace.
pub fn initial_prompt(task: &str, file_names: &[String]) -> String {
    let mut prompt = String::new();
    prompt.push_str("Task:\n");
    prompt.push_str(task.trim());
    prompt.push_str("\n\nFiles available in the working directory:\n");
    if file_names.is_empty() {
        prompt.push_str("(none)\n");
    }
    for name in file_names {
        prompt.push_str("- ");
        prompt.push_str(name);
        prompt.push('\n');
    }
    prompt
}

/// Turn that carries the output of the previous attempt back to the oracle.
pub fn feedback_prompt(feedback: &str, is_error: bool) -> String {
    if is_error {
        format!(
            "The previous script failed with the following error output:\n\n{}\n\nReturn a corrected script.",
            feedback
        )
    } else {
        format!(
            "The previous script ran without errors and printed:\n\n{}\n\nContinue: return the next script, setting \"is_final_answer\" to true once it assigns the final answer to `result`.",
            feedback
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_initial_prompt_lists_files() {
        let prompt = initial_prompt(
            "  How many rows?\n",
            &["data.csv".to_string(), "questions.txt".to_string()],
        );
        assert!(prompt.starts_with("Task:\nHow many rows?\n"));
        assert!(prompt.contains("- data.csv\n"));
    }

    #[test]
    fn test_feedback_prompt_embeds_output() {
        assert!(feedback_prompt("--- EXECUTION ERROR ---\nboom", true).contains("boom"));
        assert!(feedback_prompt("42 rows", false).contains("42 rows"));
    }
}
