//! System prompts for the router's generation calls.

pub const TOOL_PICKER_PROMPT: &str = "\
Your job is to choose the right tool needed to respond to the user question.
The available tools are provided to you in the request.
Make sure to pass the right and complete arguments to the chosen tool.";

pub const QUERY_UPDATE_PROMPT: &str = r#"You are an expert at updating questions to make them more atomic, specific, and easier to find the answer to.
You do this by filling in missing information in the question, with the extra information provided to you in previous answers.
You respond with the updated question that has all information in it.
Only edit the question if needed. If the original question already is atomic, specific, and easy to answer, you keep the original.
Do not ask for more information than the original question. Only rephrase the question to make it more complete.
JSON template to use:
{
"question": "question1"
}"#;

pub const ANSWER_CRITIQUE_PROMPT: &str = r#"You are an expert at identifying if questions have been fully answered or if there is an opportunity to enrich the answer.
The user will provide a question, and you will scan through the provided information to see if the question is answered.
If anything is missing from the answer, you will provide a set of new questions that can be asked to gather the missing information.
All new questions must be complete, atomic, and specific.
However, if the provided information is enough to answer the original question, you will respond with an empty list.
JSON template to use for finding missing information:
{
"questions": ["question1", "question2"]
}"#;

pub const MAIN_PROMPT: &str = "\
Your job is to help the user with their questions.
You will receive user questions and information needed to answer the questions.
If the information is missing to answer part of or the whole question, you will say that the information is missing.
You will only use the information provided to you in the prompt to answer the questions.
You are not allowed to make anything up or use external information.";

pub fn rewrite_request(question: &str) -> String {
    format!("The user question to rewrite: '{}'", question)
}

pub fn route_request(question: &str) -> String {
    format!("The user question to find a tool to answer: '{}'", question)
}

pub fn critique_request(question: &str) -> String {
    format!("The original user question to answer: {}", question)
}

pub fn answer_request(question: &str) -> String {
    format!("The user question to answer: {}", question)
}

/// Assistant turn recording what one pass found.
pub fn answer_turn(question: &str, results: &[serde_json::Value]) -> String {
    let rendered = serde_json::to_string(results).unwrap_or_else(|_| "[]".to_string());
    format!("For the question: '{}', we have the answer: '{}'", question, rendered)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_answer_turn_embeds_json() {
        let turn = answer_turn("Who directed Heat?", &[json!({"directors": ["Michael Mann"]})]);
        assert_eq!(
            turn,
            r#"For the question: 'Who directed Heat?', we have the answer: '[{"directors":["Michael Mann"]}]'"#
        );
    }
}
