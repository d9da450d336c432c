//! Parsing of WebDAV multistatus bodies and the request bodies that ask for them.

use roxmltree::Node;

pub const CURRENT_USER_PRINCIPAL: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<d:propfind xmlns:d="DAV:">
  <d:prop>
    <d:current-user-principal/>
  </d:prop>
</d:propfind>"#;

pub const CALENDAR_HOME_SET: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<d:propfind xmlns:d="DAV:" xmlns:c="urn:ietf:params:xml:ns:caldav">
  <d:prop>
    <c:calendar-home-set/>
  </d:prop>
</d:propfind>"#;

pub const LIST_CALENDARS: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<d:propfind xmlns:d="DAV:" xmlns:ic="http://apple.com/ns/ical/">
  <d:prop>
    <d:displayname/>
    <d:resourcetype/>
    <ic:calendar-color/>
  </d:prop>
</d:propfind>"#;

pub const LIST_EVENTS: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<d:propfind xmlns:d="DAV:">
  <d:prop>
    <d:resourcetype/>
    <d:getetag/>
  </d:prop>
</d:propfind>"#;

/// MKCALENDAR body for a VEVENT calendar with a display name and Apple color.
pub fn mkcalendar_body(name: &str, color: &str) -> String {
    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<c:mkcalendar xmlns:d="DAV:" xmlns:c="urn:ietf:params:xml:ns:caldav" xmlns:ic="http://apple.com/ns/ical/">
  <d:set>
    <d:prop>
      <d:displayname>{}</d:displayname>
      <ic:calendar-color>{}</ic:calendar-color>
      <c:supported-calendar-component-set>
        <c:comp name="VEVENT"/>
      </c:supported-calendar-component-set>
    </d:prop>
  </d:set>
</c:mkcalendar>"#,
        escape_xml(name),
        escape_xml(color)
    )
}

fn escape_xml(value: &str) -> String {
    value
        .replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

/// One `<response>` of a multistatus body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DavEntry {
    pub href: String,
    pub display_name: Option<String>,
    pub color: Option<String>,
    pub etag: Option<String>,
    pub is_collection: bool,
    pub is_calendar: bool,
}

pub fn parse_multistatus(text: &str) -> Result<Vec<DavEntry>, roxmltree::Error> {
    let doc = roxmltree::Document::parse(text)?;
    let root = doc.root_element();

    let mut entries = Vec::new();
    for response in root.descendants().filter(|n| n.tag_name().name() == "response") {
        // Only the response's own href; nested hrefs belong to properties
        let href = response
            .children()
            .find(|n| n.tag_name().name() == "href")
            .and_then(|n| n.text())
            .map(|s| s.trim().to_string());
        let Some(href) = href else { continue };

        let resource_type = find(&response, "resourcetype");
        let has_type = |name: &str| {
            resource_type
                .map(|rt| rt.children().any(|n| n.tag_name().name() == name))
                .unwrap_or(false)
        };

        entries.push(DavEntry {
            href,
            display_name: text_of(&response, "displayname"),
            color: text_of(&response, "calendar-color").map(|c| normalize_color(&c)),
            etag: text_of(&response, "getetag"),
            is_collection: has_type("collection"),
            is_calendar: has_type("calendar"),
        });
    }

    Ok(entries)
}

/// First `<href>` nested inside the named property, e.g. `current-user-principal`.
pub fn property_href(text: &str, property: &str) -> Result<Option<String>, roxmltree::Error> {
    let doc = roxmltree::Document::parse(text)?;
    let href = doc
        .descendants()
        .find(|n| n.tag_name().name() == property)
        .and_then(|prop| prop.descendants().find(|n| n.tag_name().name() == "href"))
        .and_then(|n| n.text())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty());
    Ok(href)
}

fn find<'a, 'input>(node: &Node<'a, 'input>, name: &str) -> Option<Node<'a, 'input>> {
    node.descendants().find(|n| n.tag_name().name() == name)
}

fn text_of(node: &Node, name: &str) -> Option<String> {
    find(node, name)
        .and_then(|n| n.text())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

/// iCloud reports colors as `#RRGGBBAA`; keep `#RRGGBB`.
pub fn normalize_color(color: &str) -> String {
    let color = color.trim();
    if color.len() == 9 && color.starts_with('#') {
        color[..7].to_string()
    } else {
        color.to_string()
    }
}
