use crate::api::ApiClient;
use crate::cache::Cache;
use crate::error::ApiError;
use crate::models::{Envelope, NewLabel, TaskLabel};
use crate::parser::{parse_hex_color, parse_label_input};
use ratatui::style::Color;
use tracing::{info, warn};

pub type LabelList = Envelope<Vec<TaskLabel>>;

/// Labels whose title contains `term`, ignoring case, in their original
/// order. An empty term matches everything.
pub fn filter_labels<'a>(labels: &'a [TaskLabel], term: &str) -> Vec<&'a TaskLabel> {
    if term.is_empty() {
        return labels.iter().collect();
    }
    let needle = term.to_lowercase();
    labels
        .iter()
        .filter(|label| label.title.to_lowercase().contains(&needle))
        .collect()
}

/// YIQ brightness test.
pub fn is_light(r: u8, g: u8, b: u8) -> bool {
    let yiq = (r as u32 * 299 + g as u32 * 587 + b as u32 * 114) / 1000;
    yiq >= 128
}

/// Background and readable foreground for a label chip. Unparseable colors
/// fall back to the default terminal palette.
pub fn label_colors(color: &str) -> (Color, Color) {
    match parse_hex_color(color) {
        Some((r, g, b)) => {
            let fg = if is_light(r, g, b) {
                Color::Black
            } else {
                Color::White
            };
            (Color::Rgb(r, g, b), fg)
        }
        None => (Color::Yellow, Color::Black),
    }
}

#[derive(Debug, thiserror::Error)]
pub enum LabelError {
    #[error("label title cannot be empty")]
    EmptyTitle,
    #[error(transparent)]
    Api(#[from] ApiError),
}

/// Create a label from "Title #rrggbb" input and refresh the label list.
pub async fn create_label(
    api: &ApiClient,
    labels: &Cache<LabelList>,
    input: &str,
) -> Result<TaskLabel, LabelError> {
    let parsed = parse_label_input(input);
    if parsed.title.is_empty() {
        return Err(LabelError::EmptyTitle);
    }

    let created = api
        .create_label(&NewLabel {
            title: parsed.title,
            color: parsed.color,
        })
        .await?;
    info!(label_id = %created.data.id, "created label");

    if let Err(err) = labels.invalidate(&api.labels_url()).await {
        warn!(error = %err, "label list refresh failed after create");
    }
    Ok(created.data)
}

/// Delete a label; on success the label list is refetched. On failure the
/// cache is not touched.
pub async fn delete_label(
    api: &ApiClient,
    labels: &Cache<LabelList>,
    label_id: &str,
) -> Result<(), ApiError> {
    api.delete_label(label_id).await?;
    info!(label_id, "deleted label");

    if let Err(err) = labels.invalidate(&api.labels_url()).await {
        warn!(error = %err, "label list refresh failed after delete");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{label, label_json, labels_cache};
    use serde_json::json;
    use wiremock::matchers::{body_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn sample() -> Vec<TaskLabel> {
        vec![
            label("1", "Work", "#ff0000"),
            label("2", "homework", "#00ff00"),
            label("3", "Errands", "#0000ff"),
            label("4", "WORKOUT", "#ffffff"),
        ]
    }

    fn titles(labels: Vec<&TaskLabel>) -> Vec<&str> {
        labels.into_iter().map(|l| l.title.as_str()).collect()
    }

    #[test]
    fn test_empty_term_returns_everything() {
        let labels = sample();
        assert_eq!(filter_labels(&labels, "").len(), labels.len());
    }

    #[test]
    fn test_filter_is_case_insensitive_and_keeps_order() {
        let labels = sample();
        assert_eq!(
            titles(filter_labels(&labels, "WoRk")),
            vec!["Work", "homework", "WORKOUT"]
        );
        assert!(filter_labels(&labels, "zzz").is_empty());
    }

    #[test]
    fn test_filter_result_is_subsequence() {
        let labels = sample();
        for term in ["", "o", "e", "rr", "x", "WORK"] {
            let filtered = filter_labels(&labels, term);
            let mut rest = labels.iter();
            for picked in filtered {
                assert!(rest.any(|l| l == picked), "order broken for {:?}", term);
            }
        }
    }

    #[test]
    fn test_label_text_contrast() {
        assert_eq!(
            label_colors("#ffffff"),
            (Color::Rgb(255, 255, 255), Color::Black)
        );
        assert_eq!(label_colors("#000080"), (Color::Rgb(0, 0, 128), Color::White));
        assert_eq!(label_colors("teal"), (Color::Yellow, Color::Black));
        assert!(is_light(255, 255, 0));
        assert!(!is_light(255, 0, 0));
    }

    #[tokio::test]
    async fn test_delete_success_drops_label_from_next_fetch() {
        let server = MockServer::start().await;
        let api = ApiClient::new(&server.uri()).unwrap();
        let cache = labels_cache(&api);

        Mock::given(method("GET"))
            .and(path("/labels"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "meta": {},
                "data": [label_json("1", "Work"), label_json("2", "Home")]
            })))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        cache.get(&api.labels_url()).await.unwrap();

        Mock::given(method("DELETE"))
            .and(path("/labels/1"))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/labels"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "meta": {},
                "data": [label_json("2", "Home")]
            })))
            .mount(&server)
            .await;

        delete_label(&api, &cache, "1").await.unwrap();

        let list = cache.peek(&api.labels_url()).unwrap();
        assert_eq!(list.data.len(), 1);
        assert_eq!(list.data[0].id, "2");
    }

    #[tokio::test]
    async fn test_delete_failure_leaves_cache_untouched() {
        let server = MockServer::start().await;
        let api = ApiClient::new(&server.uri()).unwrap();
        let cache = labels_cache(&api);

        Mock::given(method("GET"))
            .and(path("/labels"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "meta": {},
                "data": [label_json("1", "Work")]
            })))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("DELETE"))
            .and(path("/labels/1"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        cache.get(&api.labels_url()).await.unwrap();
        assert!(delete_label(&api, &cache, "1").await.is_err());

        let list = cache.peek(&api.labels_url()).unwrap();
        assert_eq!(list.data.len(), 1);
        assert_eq!(list.data[0].id, "1");
    }

    #[tokio::test]
    async fn test_create_posts_parsed_label() {
        let server = MockServer::start().await;
        let api = ApiClient::new(&server.uri()).unwrap();
        let cache = labels_cache(&api);

        Mock::given(method("POST"))
            .and(path("/labels"))
            .and(body_json(json!({"title": "Urgent", "color": "#e11d48"})))
            .respond_with(ResponseTemplate::new(201).set_body_json(json!({
                "meta": {},
                "data": {"id": "9", "title": "Urgent", "color": "#e11d48"}
            })))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/labels"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "meta": {},
                "data": [{"id": "9", "title": "Urgent", "color": "#e11d48"}]
            })))
            .mount(&server)
            .await;

        let created = create_label(&api, &cache, "Urgent #E11D48").await.unwrap();
        assert_eq!(created.id, "9");
        assert_eq!(cache.peek(&api.labels_url()).unwrap().data.len(), 1);
    }

    #[tokio::test]
    async fn test_create_rejects_blank_title_locally() {
        let server = MockServer::start().await;
        let api = ApiClient::new(&server.uri()).unwrap();
        let cache = labels_cache(&api);

        assert!(matches!(
            create_label(&api, &cache, "  #ffffff ").await,
            Err(LabelError::EmptyTitle)
        ));
    }
}
