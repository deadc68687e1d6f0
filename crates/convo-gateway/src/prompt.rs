use convo_core::types::ConversationRequest;

/// The structured payload sent as the user-turn message to any chat-style
/// provider — everything the model needs to produce a
/// [`convo_core::types::ConversationResponse`] as its reply content.
pub fn build_user_payload(request: &ConversationRequest) -> serde_json::Value {
    serde_json::json!({
        "conversation_state": request.conversation_state,
        "user_input": request.user_input,
        "language_constraints": request.language_constraints,
        "generation_instructions": request.generation_instructions,
    })
}
