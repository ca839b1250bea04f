use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::borrow::Cow;

/// Longest entry title, in characters, before it gets truncated.
const MAX_TITLE_CHARS: usize = 100;

// ============================================================================
// Vendor Activity Shapes
// ============================================================================

/// One public activity from the vendor API. Only the fields the Atom output
/// uses are decoded; everything else is ignored.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Activity {
    pub id: String,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub published: Option<String>,
    #[serde(default)]
    pub updated: Option<String>,
    /// "post", "share" or "checkin"
    #[serde(default)]
    pub verb: Option<String>,
    #[serde(default)]
    pub actor: Actor,
    #[serde(default)]
    pub object: ActivityObject,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Actor {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub image: Option<Image>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Image {
    #[serde(default)]
    pub url: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ActivityObject {
    #[serde(default)]
    pub content: Option<String>,
    /// Original author of a reshared post
    #[serde(default)]
    pub actor: Option<Actor>,
    #[serde(default)]
    pub attachments: Vec<Attachment>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Attachment {
    #[serde(default)]
    pub object_type: Option<String>,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub image: Option<Image>,
}

// ============================================================================
// Feed Items
// ============================================================================

/// Author of a feed or entry.
#[derive(Debug, Clone, PartialEq)]
pub struct Person {
    pub name: String,
    pub url: Option<String>,
}

/// Renderer-neutral entry built from an [`Activity`].
#[derive(Debug, Clone, PartialEq)]
pub struct FeedItem {
    pub id: String,
    pub permalink: Option<String>,
    pub title: String,
    /// HTML body
    pub content: String,
    pub published: DateTime<Utc>,
    pub updated: DateTime<Utc>,
    pub author: Option<Person>,
}

impl FeedItem {
    /// Convert an activity, using `now` for timestamps the vendor left out or
    /// sent in a format we cannot read.
    pub fn from_activity(activity: &Activity, now: DateTime<Utc>) -> Self {
        let published = parse_timestamp(activity.published.as_deref()).unwrap_or(now);
        let updated = parse_timestamp(activity.updated.as_deref()).unwrap_or(published);
        let content = render_content(activity);

        let title = match activity.object.content.as_deref().filter(|c| !c.trim().is_empty()) {
            Some(html) => title_from_html(html),
            None => activity
                .object
                .attachments
                .iter()
                .find_map(|a| a.display_name.clone())
                .or_else(|| activity.title.clone().filter(|t| !t.trim().is_empty()))
                .unwrap_or_else(|| "A public post".to_string()),
        };

        Self {
            id: activity.id.clone(),
            permalink: activity.url.clone(),
            title,
            content,
            published,
            updated,
            author: activity.actor.display_name.clone().map(|name| Person {
                name,
                url: activity.actor.url.clone(),
            }),
        }
    }
}

fn parse_timestamp(value: Option<&str>) -> Option<DateTime<Utc>> {
    let value = value?;
    match DateTime::parse_from_rfc3339(value) {
        Ok(dt) => Some(dt.with_timezone(&Utc)),
        Err(e) => {
            tracing::debug!(value = %value, error = %e, "Unparseable activity timestamp");
            None
        }
    }
}

/// HTML body of an entry: the post text, who it was reshared from, and
/// links or images for its attachments.
fn render_content(activity: &Activity) -> String {
    let mut html = String::new();

    if activity.verb.as_deref() == Some("share") {
        if let Some(original) = &activity.object.actor {
            let name = escape(original.display_name.as_deref().unwrap_or("Someone"));
            match &original.url {
                Some(url) => html.push_str(&format!(
                    "<a href=\"{}\">{}</a> originally shared this post:<br/><br/>",
                    escape(url),
                    name
                )),
                None => html.push_str(&format!("{name} originally shared this post:<br/><br/>")),
            }
        }
    }

    if let Some(content) = &activity.object.content {
        html.push_str(content);
    }

    for attachment in &activity.object.attachments {
        let image_url = attachment.image.as_ref().and_then(|i| i.url.as_deref());
        match (attachment.object_type.as_deref(), image_url, &attachment.url) {
            (Some("photo"), Some(src), _) => {
                html.push_str(&format!(
                    "<br/><br/><img src=\"{}\" alt=\"attached image\"/>",
                    escape(src)
                ));
            }
            (_, _, Some(url)) => {
                let text = attachment.display_name.as_deref().unwrap_or(url);
                html.push_str(&format!(
                    "<br/><br/><a href=\"{}\">{}</a>",
                    escape(url),
                    escape(text)
                ));
            }
            _ => {}
        }
    }

    if html.is_empty() {
        if let Some(url) = &activity.url {
            html.push_str(&escape(url));
        }
    }
    html
}

fn escape(raw: &str) -> Cow<'_, str> {
    quick_xml::escape::escape(raw)
}

/// Plain-text title from an HTML fragment, at most [`MAX_TITLE_CHARS`]
/// characters, cut at a word boundary when one is close to the limit.
pub(crate) fn title_from_html(html: &str) -> String {
    let mut text = String::with_capacity(html.len());
    let mut in_tag = false;
    for c in html.chars() {
        match c {
            '<' => {
                in_tag = true;
                text.push(' ');
            }
            '>' if in_tag => in_tag = false,
            _ if !in_tag => text.push(c),
            _ => {}
        }
    }

    // Unknown entities (&nbsp; and friends) leave the text as it was
    let text = match quick_xml::escape::unescape(&text) {
        Ok(unescaped) => unescaped.into_owned(),
        Err(_) => text,
    };
    let title = text.split_whitespace().collect::<Vec<_>>().join(" ");

    if title.chars().count() <= MAX_TITLE_CHARS {
        return title;
    }

    let mut candidate: String = title.chars().take(MAX_TITLE_CHARS - 3).collect();
    let tail_start = candidate
        .char_indices()
        .rev()
        .nth(4)
        .map(|(i, _)| i)
        .unwrap_or(0);
    if let Some(space) = candidate[tail_start..].rfind(' ') {
        candidate.truncate(tail_start + space);
    }
    format!("{candidate}...")
}
