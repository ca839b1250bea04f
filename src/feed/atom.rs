use anyhow::{Context, Result};
use chrono::{DateTime, SecondsFormat, Utc};
use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};
use quick_xml::Writer;
use std::io::Cursor;

use super::{FeedItem, Person};

const ATOM_NS: &str = "http://www.w3.org/2005/Atom";

/// Feed-level metadata shared by every entry.
#[derive(Debug, Clone)]
pub struct FeedMeta {
    /// Stable feed identifier (the account or page URL)
    pub id: String,
    pub title: String,
    /// Human-facing page of the account
    pub alternate_link: String,
    /// URL this feed is served from
    pub self_link: String,
    pub updated: DateTime<Utc>,
    pub author: Option<Person>,
}

/// Serializes a list of items into a feed document.
pub trait FeedRenderer: Send + Sync {
    fn content_type(&self) -> &'static str;

    fn render(&self, meta: &FeedMeta, items: &[FeedItem]) -> Result<String>;
}

/// Atom 1.0 output. A feed with no items gets a single placeholder entry so
/// readers still show something.
#[derive(Debug, Default, Clone, Copy)]
pub struct AtomRenderer;

impl FeedRenderer for AtomRenderer {
    fn content_type(&self) -> &'static str {
        "application/atom+xml"
    }

    fn render(&self, meta: &FeedMeta, items: &[FeedItem]) -> Result<String> {
        let mut writer = Writer::new_with_indent(Cursor::new(Vec::new()), b' ', 1);

        writer
            .write_event(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)))
            .context("Failed to write XML declaration")?;

        let mut feed = BytesStart::new("feed");
        feed.push_attribute(("xmlns", ATOM_NS));
        feed.push_attribute(("xml:lang", "en"));
        writer
            .write_event(Event::Start(feed))
            .context("Failed to write feed element")?;

        if items.is_empty() {
            write_text(&mut writer, "title", "No Public Items Found")?;
        } else {
            write_text(&mut writer, "title", &meta.title)?;
        }
        write_link(&mut writer, &meta.alternate_link, "alternate")?;
        write_link(&mut writer, &meta.self_link, "self")?;
        write_text(&mut writer, "id", &meta.id)?;
        write_text(&mut writer, "updated", &atom_date(meta.updated))?;
        if let Some(author) = &meta.author {
            write_person(&mut writer, author)?;
        }

        if items.is_empty() {
            write_placeholder_entry(&mut writer, meta)?;
        }
        for item in items {
            write_entry(&mut writer, item)?;
        }

        writer
            .write_event(Event::End(BytesEnd::new("feed")))
            .context("Failed to write feed end")?;

        let result = writer.into_inner().into_inner();
        String::from_utf8(result).context("Generated Atom contains invalid UTF-8")
    }
}

/// `2013-05-01T10:00:00Z`
pub fn atom_date(dt: DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Secs, true)
}

type XmlWriter = Writer<Cursor<Vec<u8>>>;

fn write_entry(writer: &mut XmlWriter, item: &FeedItem) -> Result<()> {
    writer
        .write_event(Event::Start(BytesStart::new("entry")))
        .context("Failed to write entry element")?;

    write_text(writer, "title", &item.title)?;
    if let Some(permalink) = &item.permalink {
        write_link(writer, permalink, "alternate")?;
    }
    write_text(writer, "id", &entry_id(item))?;
    write_text(writer, "published", &atom_date(item.published))?;
    write_text(writer, "updated", &atom_date(item.updated))?;
    if let Some(author) = &item.author {
        write_person(writer, author)?;
    }

    let mut content = BytesStart::new("content");
    content.push_attribute(("type", "html"));
    writer
        .write_event(Event::Start(content))
        .context("Failed to write content element")?;
    writer
        .write_event(Event::Text(BytesText::new(&item.content)))
        .context("Failed to write entry content")?;
    writer
        .write_event(Event::End(BytesEnd::new("content")))
        .context("Failed to write content end")?;

    writer
        .write_event(Event::End(BytesEnd::new("entry")))
        .context("Failed to write entry end")?;
    Ok(())
}

fn write_placeholder_entry(writer: &mut XmlWriter, meta: &FeedMeta) -> Result<()> {
    writer
        .write_event(Event::Start(BytesStart::new("entry")))
        .context("Failed to write entry element")?;
    write_text(writer, "title", "No Public Items Found")?;
    write_link(writer, &meta.alternate_link, "alternate")?;
    write_text(writer, "id", &meta.id)?;
    write_text(writer, "updated", &atom_date(meta.updated))?;
    write_text(writer, "summary", "This account has not made any posts public.")?;
    writer
        .write_event(Event::End(BytesEnd::new("entry")))
        .context("Failed to write entry end")?;
    Ok(())
}

/// Entry ids are tag URIs dated by publication day, so they stay stable
/// when a post is edited.
fn entry_id(item: &FeedItem) -> String {
    format!(
        "tag:atomgate,{}:/{}/",
        item.published.format("%Y-%m-%d"),
        item.id
    )
}

fn write_text(writer: &mut XmlWriter, name: &str, text: &str) -> Result<()> {
    writer
        .write_event(Event::Start(BytesStart::new(name)))
        .with_context(|| format!("Failed to write {name} element"))?;
    writer
        .write_event(Event::Text(BytesText::new(text)))
        .with_context(|| format!("Failed to write {name} text"))?;
    writer
        .write_event(Event::End(BytesEnd::new(name)))
        .with_context(|| format!("Failed to write {name} end"))?;
    Ok(())
}

fn write_link(writer: &mut XmlWriter, href: &str, rel: &str) -> Result<()> {
    let mut link = BytesStart::new("link");
    link.push_attribute(("href", href));
    link.push_attribute(("rel", rel));
    writer
        .write_event(Event::Empty(link))
        .context("Failed to write link element")?;
    Ok(())
}

fn write_person(writer: &mut XmlWriter, person: &Person) -> Result<()> {
    writer
        .write_event(Event::Start(BytesStart::new("author")))
        .context("Failed to write author element")?;
    write_text(writer, "name", &person.name)?;
    if let Some(url) = &person.url {
        write_text(writer, "uri", url)?;
    }
    writer
        .write_event(Event::End(BytesEnd::new("author")))
        .context("Failed to write author end")?;
    Ok(())
}
