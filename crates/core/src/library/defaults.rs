use super::library_model::ReplyTemplate;

/// Templates seeded on first run.
pub fn default_templates(now_millis: i64) -> Vec<ReplyTemplate> {
    vec![
        ReplyTemplate {
            id: "1".to_string(),
            title: "Supportive".to_string(),
            body: "This is amazing, {{nickname}}! 🙌".to_string(),
            tags: vec!["uplift".to_string()],
            favorite: true,
            created_at: now_millis,
            updated_at: now_millis,
        },
        ReplyTemplate {
            id: "2".to_string(),
            title: "Question".to_string(),
            body: "Great point {{nickname}}! What made you think of this approach?".to_string(),
            tags: vec!["question".to_string()],
            favorite: false,
            created_at: now_millis,
            updated_at: now_millis,
        },
    ]
}
