//! Output types: what the pipeline produces and what the service returns.
//!
//! [`ConversionOutput`] is the pipeline's product (markdown plus a typed
//! content list). [`ConversionResult`] is the uniform
//! `{success, message, data}` envelope every endpoint answers with.

use crate::error::DocParseError;
use serde::{Deserialize, Serialize, Serializer};
use std::collections::HashMap;

/// One entry of the structured content list.
///
/// Serialises as `{"type": "text", ...}` / `{"type": "image", ...}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlock {
    Text {
        text: String,
        /// Heading level (1 = title). Absent for body text.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        text_level: Option<u8>,
        /// 0-indexed page the block came from.
        page_idx: usize,
    },
    Image {
        /// Local path while in the workspace, URL after rehosting.
        img_path: String,
        #[serde(default)]
        img_caption: Vec<String>,
        page_idx: usize,
    },
}

/// Markdown and structured content produced by a pipeline run.
///
/// Markdown may still reference images by local path at this stage.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConversionOutput {
    pub markdown: String,
    pub content_list: Vec<ContentBlock>,
}

impl ConversionOutput {
    /// Replace image paths in the content list using a local → URL mapping.
    pub fn rewrite_image_paths(&mut self, replacements: &HashMap<String, String>) {
        for block in &mut self.content_list {
            if let ContentBlock::Image { img_path, .. } = block {
                if let Some(url) = replacements.get(img_path.as_str()) {
                    *img_path = url.clone();
                }
            }
        }
    }

    /// Serialise the content list as a JSON array string.
    pub fn content_json(&self) -> Result<String, DocParseError> {
        serde_json::to_string(&self.content_list)
            .map_err(|e| DocParseError::Internal(format!("content list serialisation: {e}")))
    }
}

/// The `data` payload of a successful response.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResultData {
    pub markdown: String,
    /// JSON array string of [`ContentBlock`]s, or `""` for endpoints that
    /// do not produce structured content.
    pub json: String,
}

/// The response envelope shared by every conversion endpoint.
///
/// `success: false` always carries a non-empty `message` and `data: {}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConversionResult {
    pub success: bool,
    pub message: String,
    #[serde(serialize_with = "data_or_empty_object")]
    pub data: Option<ResultData>,
}

impl ConversionResult {
    pub const SUCCESS_MESSAGE: &'static str = "success";

    pub fn success(data: ResultData) -> Self {
        Self {
            success: true,
            message: Self::SUCCESS_MESSAGE.to_string(),
            data: Some(data),
        }
    }

    pub fn failure(error: &DocParseError) -> Self {
        let message = error.to_string();
        Self {
            success: false,
            message: if message.is_empty() {
                "Document conversion failed.".to_string()
            } else {
                message
            },
            data: None,
        }
    }

    /// Map the orchestrator's terminal state onto the envelope.
    pub fn from_outcome(outcome: Result<ResultData, DocParseError>) -> Self {
        match outcome {
            Ok(data) => Self::success(data),
            Err(e) => Self::failure(&e),
        }
    }
}

fn data_or_empty_object<S: Serializer>(
    data: &Option<ResultData>,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    match data {
        Some(d) => d.serialize(serializer),
        None => serde_json::Map::new().serialize(serializer),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn failure_envelope_has_empty_data_object() {
        let r = ConversionResult::failure(&DocParseError::MissingSource);
        let v = serde_json::to_value(&r).unwrap();
        assert_eq!(
            v,
            json!({
                "success": false,
                "message": "Both document url and document base64 data are empty.",
                "data": {}
            })
        );
    }

    #[test]
    fn success_envelope_shape() {
        let r = ConversionResult::from_outcome(Ok(ResultData {
            markdown: "# T\n".into(),
            json: "[]".into(),
        }));
        let v = serde_json::to_value(&r).unwrap();
        assert_eq!(v["success"], true);
        assert_eq!(v["message"], "success");
        assert_eq!(v["data"]["markdown"], "# T\n");
        assert_eq!(v["data"]["json"], "[]");
    }

    #[test]
    fn content_block_wire_format() {
        let blocks = vec![
            ContentBlock::Text {
                text: "Intro".into(),
                text_level: Some(1),
                page_idx: 0,
            },
            ContentBlock::Text {
                text: "Body".into(),
                text_level: None,
                page_idx: 0,
            },
            ContentBlock::Image {
                img_path: "/tmp/a.png".into(),
                img_caption: vec![],
                page_idx: 1,
            },
        ];
        let v = serde_json::to_value(&blocks).unwrap();
        assert_eq!(v[0], json!({"type": "text", "text": "Intro", "text_level": 1, "page_idx": 0}));
        assert_eq!(v[1], json!({"type": "text", "text": "Body", "page_idx": 0}));
        assert_eq!(v[2]["type"], "image");
        assert_eq!(v[2]["img_path"], "/tmp/a.png");
    }

    #[test]
    fn rewrite_only_touches_mapped_images() {
        let mut out = ConversionOutput {
            markdown: String::new(),
            content_list: vec![
                ContentBlock::Image {
                    img_path: "/ws/a.png".into(),
                    img_caption: vec![],
                    page_idx: 0,
                },
                ContentBlock::Image {
                    img_path: "/ws/b.png".into(),
                    img_caption: vec![],
                    page_idx: 0,
                },
            ],
        };
        let map = HashMap::from([("/ws/a.png".to_string(), "https://cdn/a.png".to_string())]);
        out.rewrite_image_paths(&map);
        let json = out.content_json().unwrap();
        assert!(json.contains("https://cdn/a.png"));
        assert!(json.contains("/ws/b.png"));
    }
}
