//! Assistant engine orchestration.
//!
//! Implements the tool-use loop: user query -> LLM decides whether to
//! search for a nearby facility -> execute the place search -> feed the
//! result back -> repeat until a final answer. The whole invocation is
//! wrapped in [`RetryPolicy::assistant`] so transient provider failures
//! are retried with exponential backoff.

use std::sync::Arc;

use citysafe_geo::GeoapifyClient;
use citysafe_geo::places::find_place;

use crate::providers::{ContentBlock, LlmProvider, Message, MessageContent, StopReason};
use crate::retry::RetryPolicy;
use crate::AiError;

/// Maximum number of tool-use iterations to prevent infinite loops.
const MAX_ITERATIONS: u32 = 10;

/// System prompt for the public safety assistant.
const SYSTEM_PROMPT: &str = r#"You are a public safety assistant for Indianapolis.
Respond to the user's query with smart, helpful suggestions.

If the user asks to find a nearby facility (e.g., 'nearest police station', 'where is a hospital'), use the 'find_place' tool.
- To use the 'find_place' tool, you **MUST** have latitude and longitude.
- If the user's query includes coordinates or an address, try to infer latitude and longitude.
- If the user's general location or the location where an uploaded image was taken is provided alongside the query, prioritize using those coordinates if relevant to the search.
- If no location information is available and the user asks for a nearby facility, **YOU MUST ASK THE USER FOR THEIR CURRENT LOCATION (e.g., "To find a nearby facility, I need your current latitude and longitude, or an address/intersection. Could you please provide that?") BEFORE attempting to use the tool.** Do not try to guess coordinates if not enough information is provided.
- If the 'find_place' tool is used, your answer **MUST** include the name and address of the place found. For example: 'The nearest police station I found is [Name from tool] at [Address from tool].' If the tool indicates no results were found (e.g., the 'name' field in the tool's output contains 'No results' or similar), or if an error occurred (e.g., the 'name' field mentions 'API Error' or 'Service Error'), clearly state that in your answer. For example: 'I couldn't find a [place type] nearby with the information provided.' or 'There was an issue searching for the [place type], the service reported: [tool's error message or notes if available].'

If the user provides an image:
- Acknowledge it in your response (e.g., "Thank you for the image.").
- If coordinates for the image upload are available, mention that you are aware the image was provided from approximately that location. E.g., "I see you've uploaded an image from near latitude X, longitude Y."
- You can describe what you see in the image if relevant to the query, but prioritize safety advice.
- Do not attempt to perform complex image analysis unless the query specifically asks for it in a way that aligns with public safety.
- **Do NOT attempt to verify if the image is "fake" or "real". You are not equipped for image authenticity analysis.**

For general safety advice, provide guidance directly. Be concise and clear in your responses.

Here are some predefined safety guides for common emergencies. Prioritize this information if the user's query matches one of these topics:

What to do in a House Fire:
1.  **Evacuate Immediately:** Get everyone out of the house. Don't stop to collect belongings.
2.  **Stay Low:** If there's smoke, stay low to the ground where the air is cleaner. Crawl if necessary.
3.  **Check Doors:** Before opening a door, feel it with the back of your hand. If it's hot, don't open it; find another way out.
4.  **Call 911:** Once you are safely outside, call 911 from a neighbor's phone or your cell phone.
5.  **Meeting Point:** Have a pre-arranged meeting point outside so you know everyone is safe.
6.  **Never Go Back Inside:** Do not re-enter a burning building for any reason.

What to do during an Earthquake:
1. **DROP, COVER, AND HOLD ON:**
    *   **DROP** to your hands and knees.
    *   **COVER** your head and neck with your arms. If a sturdy table or desk is nearby, crawl beneath it for shelter.
    *   **HOLD ON** to your shelter (or to your head and neck) until the shaking stops.
2.  **Indoors:** Stay away from windows, glass, and anything that could fall (like light fixtures or furniture).
3.  **Outdoors:** Move away from buildings, streetlights, and utility wires.
4.  **In a Vehicle:** Pull over to a clear location (away from buildings, trees, overpasses, utility wires) and stop. Stay in the vehicle with your seatbelt fastened until the shaking stops.
5.  **After Shaking:** Be prepared for aftershocks. Check for injuries and damage.

What to do for a Medical Emergency (Basic First Aid Pointers - Call 911 first for serious situations):
1.  **Assess for Danger:** Ensure the scene is safe for you before approaching the injured person.
2.  **Call 911:** For any serious injury or illness, call emergency services immediately. Provide your location and details about the situation.
3.  **Check for Responsiveness:** Gently tap the person and shout, "Are you okay?"
4.  **Check for Breathing:** Look, listen, and feel for signs of normal breathing for no more than 10 seconds.
5.  **Control Severe Bleeding:** Apply direct, firm pressure to the wound using a clean cloth or your hands.
6.  **For Burns (Minor):** Cool the burn with cool (not ice-cold) running water for 10-15 minutes. Cover loosely with a sterile dressing.
7.  **For Choking (Conscious Adult/Child):** Perform the Heimlich maneuver (abdominal thrusts).
8.  **Do Not Move:** If you suspect a head, neck, or back injury, do not move the person unless they are in immediate danger.
(Disclaimer: This is very basic advice. Proper first aid training is recommended.)

If the query is general and not covered by specific guides or the 'find_place' tool, use your general knowledge to provide helpful public safety advice relevant to Indianapolis. **When giving advice or instructions, please use markdown `**key phrase**` to bold important headings, actions, or keywords for better readability.**"#;

/// A request for safety assistance.
#[derive(Debug, Clone, Default)]
pub struct AssistanceRequest {
    /// The user's question or request.
    pub query: String,
    /// User's general latitude, if known.
    pub latitude: Option<f64>,
    /// User's general longitude, if known.
    pub longitude: Option<f64>,
    /// Optional user-uploaded image as a data URI
    /// (`data:<mimetype>;base64,<encoded_data>`).
    pub image_data_uri: Option<String>,
    /// Latitude where the image was uploaded from, if available.
    pub image_latitude: Option<f64>,
    /// Longitude where the image was uploaded from, if available.
    pub image_longitude: Option<f64>,
}

/// A completed assistance response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssistanceResponse {
    /// The advice text; includes tool findings when a tool was used.
    pub advice: String,
}

/// Tool definitions exposed to the model.
fn tool_definitions() -> Vec<serde_json::Value> {
    vec![serde_json::json!({
        "name": "find_place",
        "description": "Finds a nearby place like a police station, hospital, or fire station based on type and location coordinates.",
        "parameters": {
            "type": "object",
            "properties": {
                "placeType": {
                    "type": "string",
                    "description": "The type of place to find (e.g., \"police station\", \"hospital\", \"fire station\")."
                },
                "latitude": {
                    "type": "number",
                    "description": "The latitude of the location to search near."
                },
                "longitude": {
                    "type": "number",
                    "description": "The longitude of the location to search near."
                }
            },
            "required": ["placeType", "latitude", "longitude"]
        }
    })]
}

/// Splits a data URI into its media type and base64 payload.
fn parse_data_uri(uri: &str) -> Option<(&str, &str)> {
    let rest = uri.strip_prefix("data:")?;
    let (media_type, data) = rest.split_once(";base64,")?;
    Some((media_type, data))
}

/// Builds the initial user message from a request.
fn build_user_message(request: &AssistanceRequest) -> Message {
    let mut text = format!("User query: {}", request.query);

    if let Some(lat) = request.latitude {
        text.push_str(&format!("\nUser's known general latitude: {lat}"));
    }
    if let Some(lon) = request.longitude {
        text.push_str(&format!("\nUser's known general longitude: {lon}"));
    }

    let image_block = request.image_data_uri.as_deref().and_then(|uri| {
        if let (Some(lat), Some(lon)) = (request.image_latitude, request.image_longitude) {
            text.push_str(&format!(
                "\nUser has also provided an image (uploaded from approx. lat: {lat}, lon: {lon})."
            ));
        } else {
            text.push_str("\nUser has also provided an image.");
        }

        let (media_type, data) = parse_data_uri(uri)?;
        Some(ContentBlock::Image {
            media_type: media_type.to_string(),
            data: data.to_string(),
        })
    });

    let content = if let Some(image) = image_block {
        MessageContent::Blocks(vec![ContentBlock::Text { text }, image])
    } else {
        MessageContent::Text(text)
    };

    Message {
        role: "user".to_string(),
        content,
    }
}

/// Extracts text content from content blocks.
fn extract_text(blocks: &[ContentBlock]) -> String {
    blocks
        .iter()
        .filter_map(|b| {
            if let ContentBlock::Text { text } = b {
                Some(text.as_str())
            } else {
                None
            }
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// The safety assistant engine.
///
/// Owns an LLM provider and a places client, and drives the tool-use
/// loop for each request.
pub struct AssistantEngine {
    provider: Box<dyn LlmProvider>,
    places: Arc<GeoapifyClient>,
    retry: RetryPolicy,
}

impl AssistantEngine {
    /// Creates an engine over the given provider and places client.
    #[must_use]
    pub const fn new(provider: Box<dyn LlmProvider>, places: Arc<GeoapifyClient>) -> Self {
        Self {
            provider,
            places,
            retry: RetryPolicy::assistant(),
        }
    }

    /// Answers a safety query, retrying transient failures.
    ///
    /// # Errors
    ///
    /// Returns [`AiError`] once the retry budget is exhausted or a
    /// non-retryable error occurs.
    pub async fn assist(&self, request: &AssistanceRequest) -> Result<AssistanceResponse, AiError> {
        self.retry
            .run(|| self.assist_once(request), AiError::is_retryable)
            .await
    }

    /// A single, unretried run of the tool-use loop.
    async fn assist_once(&self, request: &AssistanceRequest) -> Result<AssistanceResponse, AiError> {
        let tools = tool_definitions();
        let mut messages = vec![build_user_message(request)];

        for iteration in 0..MAX_ITERATIONS {
            log::debug!("Assistant iteration {iteration}");

            let response = self
                .provider
                .chat(SYSTEM_PROMPT, &messages, &tools)
                .await?;

            let has_tool_use = response
                .content
                .iter()
                .any(|b| matches!(b, ContentBlock::ToolUse { .. }));

            if response.stop_reason != StopReason::ToolUse || !has_tool_use {
                let advice = extract_text(&response.content);
                if advice.trim().is_empty() {
                    // The model is obligated to produce advice text; an empty
                    // answer is treated as a transient provider fault.
                    return Err(AiError::Provider {
                        message: "Model returned no advice text".to_string(),
                    });
                }
                return Ok(AssistanceResponse { advice });
            }

            messages.push(Message {
                role: "assistant".to_string(),
                content: MessageContent::Blocks(response.content.clone()),
            });

            let mut tool_results = Vec::new();

            for block in &response.content {
                if let ContentBlock::ToolUse { id, name, input } = block {
                    log::info!("Assistant requested tool '{name}'");
                    let result = self.execute_tool(name, input).await;
                    tool_results.push(ContentBlock::ToolResult {
                        tool_use_id: id.clone(),
                        content: result,
                    });
                }
            }

            messages.push(Message {
                role: "user".to_string(),
                content: MessageContent::Blocks(tool_results),
            });
        }

        Err(AiError::MaxIterations {
            max_iterations: MAX_ITERATIONS,
        })
    }

    /// Executes a single tool call, returning its JSON result as a string.
    ///
    /// Unknown tools and malformed inputs report the problem back to the
    /// model rather than failing the whole request.
    async fn execute_tool(&self, name: &str, input: &serde_json::Value) -> String {
        if name != "find_place" {
            return format!("Unknown tool: {name}");
        }

        let place_type = input["placeType"].as_str().unwrap_or_default();
        let (Some(latitude), Some(longitude)) =
            (input["latitude"].as_f64(), input["longitude"].as_f64())
        else {
            return "Tool error: latitude and longitude are required.".to_string();
        };

        if place_type.is_empty() {
            return "Tool error: placeType is required.".to_string();
        }

        let place = find_place(&self.places, place_type, latitude, longitude).await;

        serde_json::json!({
            "name": place.name,
            "address": place.address,
            "notes": place.notes,
        })
        .to_string()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;
    use crate::providers::LlmResponse;

    /// A scripted provider that replays canned responses in order.
    struct ScriptedProvider {
        responses: Mutex<Vec<Result<LlmResponse, AiError>>>,
        calls: Mutex<Vec<Vec<Message>>>,
    }

    impl ScriptedProvider {
        fn new(responses: Vec<Result<LlmResponse, AiError>>) -> Self {
            Self {
                responses: Mutex::new(responses),
                calls: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait::async_trait]
    impl LlmProvider for ScriptedProvider {
        async fn chat(
            &self,
            _system_prompt: &str,
            messages: &[Message],
            _tools: &[serde_json::Value],
        ) -> Result<LlmResponse, AiError> {
            self.calls.lock().unwrap().push(messages.to_vec());
            let mut responses = self.responses.lock().unwrap();
            if responses.is_empty() {
                return Err(AiError::Provider {
                    message: "script exhausted".to_string(),
                });
            }
            responses.remove(0)
        }
    }

    fn text_response(text: &str) -> LlmResponse {
        LlmResponse {
            content: vec![ContentBlock::Text {
                text: text.to_string(),
            }],
            stop_reason: StopReason::EndTurn,
        }
    }

    fn engine(responses: Vec<Result<LlmResponse, AiError>>) -> AssistantEngine {
        AssistantEngine::new(
            Box::new(ScriptedProvider::new(responses)),
            Arc::new(GeoapifyClient::new(None)),
        )
    }

    #[tokio::test]
    async fn returns_advice_on_end_turn() {
        let engine = engine(vec![Ok(text_response("Stay low and evacuate."))]);

        let response = engine
            .assist(&AssistanceRequest {
                query: "house fire".to_string(),
                ..Default::default()
            })
            .await
            .unwrap();

        assert_eq!(response.advice, "Stay low and evacuate.");
    }

    #[tokio::test]
    async fn empty_advice_is_retried() {
        let engine = engine(vec![
            Ok(text_response("")),
            Ok(text_response("Call 911.")),
        ]);

        let response = engine
            .assist(&AssistanceRequest {
                query: "help".to_string(),
                ..Default::default()
            })
            .await
            .unwrap();

        assert_eq!(response.advice, "Call 911.");
    }

    #[tokio::test]
    async fn tool_use_feeds_result_back_to_model() {
        // Without an API key the place search returns its "not configured"
        // sentinel, which still flows back to the model as a tool result.
        let tool_turn = LlmResponse {
            content: vec![ContentBlock::ToolUse {
                id: "toolu_1".to_string(),
                name: "find_place".to_string(),
                input: serde_json::json!({
                    "placeType": "hospital",
                    "latitude": 39.7684,
                    "longitude": -86.1581,
                }),
            }],
            stop_reason: StopReason::ToolUse,
        };

        let engine = engine(vec![
            Ok(tool_turn),
            Ok(text_response("The search service is not configured.")),
        ]);

        let response = engine
            .assist(&AssistanceRequest {
                query: "nearest hospital".to_string(),
                latitude: Some(39.7684),
                longitude: Some(-86.1581),
                ..Default::default()
            })
            .await
            .unwrap();

        assert_eq!(response.advice, "The search service is not configured.");
    }

    #[tokio::test]
    async fn config_errors_are_not_retried() {
        let engine = engine(vec![
            Err(AiError::Config {
                message: "no key".to_string(),
            }),
            Ok(text_response("should never be reached")),
        ]);

        let err = engine
            .assist(&AssistanceRequest {
                query: "help".to_string(),
                ..Default::default()
            })
            .await
            .unwrap_err();

        assert!(matches!(err, AiError::Config { .. }));
    }

    #[test]
    fn data_uri_parses_into_media_type_and_payload() {
        let (media_type, data) = parse_data_uri("data:image/jpeg;base64,QUJD").unwrap();
        assert_eq!(media_type, "image/jpeg");
        assert_eq!(data, "QUJD");

        assert!(parse_data_uri("not-a-data-uri").is_none());
    }

    #[test]
    fn user_message_includes_coordinates_and_image() {
        let message = build_user_message(&AssistanceRequest {
            query: "what is this".to_string(),
            latitude: Some(39.7),
            longitude: Some(-86.1),
            image_data_uri: Some("data:image/png;base64,QUJD".to_string()),
            image_latitude: Some(39.8),
            image_longitude: Some(-86.2),
        });

        let MessageContent::Blocks(blocks) = &message.content else {
            panic!("expected block content");
        };
        assert_eq!(blocks.len(), 2);

        let ContentBlock::Text { text } = &blocks[0] else {
            panic!("expected leading text block");
        };
        assert!(text.contains("general latitude: 39.7"));
        assert!(text.contains("uploaded from approx. lat: 39.8"));
        assert!(matches!(&blocks[1], ContentBlock::Image { .. }));
    }
}
