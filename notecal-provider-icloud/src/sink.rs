use async_trait::async_trait;
use http::StatusCode;
use notecal_core::error::{SinkError, SinkResult};
use notecal_core::ics::generate_ics;
use notecal_core::sink::task_id_from_href;
use notecal_core::{CalendarIdentity, CalendarSink, DesiredEvent, RemoteEvent};
use tokio::sync::OnceCell;

use crate::caldav::{
    DavCall, absolute_url, check_status, create_caldav_client, event_url, same_resource, send,
    url_to_href,
};
use crate::credentials::{DEFAULT_CALDAV_URL, ICloudCredentials};
use crate::multistatus::{self, DavEntry};

/// iCloud calendar reached over CalDAV.
///
/// Hrefs handed to the engine are absolute URLs on the account's
/// `pXX-caldav.icloud.com` host, so stored records stay valid across restarts.
pub struct ICloudCalendarSink {
    credentials: ICloudCredentials,
    caldav_url: String,
    calendar_home: OnceCell<String>,
}

impl ICloudCalendarSink {
    pub fn new(credentials: ICloudCredentials) -> Self {
        ICloudCalendarSink {
            credentials,
            caldav_url: DEFAULT_CALDAV_URL.to_string(),
            calendar_home: OnceCell::new(),
        }
    }

    pub fn with_caldav_url(mut self, caldav_url: impl Into<String>) -> Self {
        self.caldav_url = caldav_url.into();
        self
    }

    /// Principal, then calendar-home-set. Cached for the life of the sink.
    async fn calendar_home(&self) -> SinkResult<&str> {
        let home = self
            .calendar_home
            .get_or_try_init(|| self.discover_calendar_home())
            .await?;
        Ok(home.as_str())
    }

    async fn discover_calendar_home(&self) -> SinkResult<String> {
        let client = create_caldav_client(&self.caldav_url, &self.credentials)?;
        let root = url_to_href(&self.caldav_url);
        let root = if root.is_empty() { "/".to_string() } else { root };

        let reply = send(
            &client,
            DavCall::propfind(&root, 0, multistatus::CURRENT_USER_PRINCIPAL),
        )
        .await?;
        check_status(&reply, "Principal discovery")?;
        let principal = multistatus::property_href(&reply.body, "current-user-principal")
            .map_err(invalid_xml)?
            .ok_or_else(|| missing_property("current-user-principal"))?;
        let principal_url = absolute_url(&principal, &self.caldav_url);

        let client = create_caldav_client(&principal_url, &self.credentials)?;
        let reply = send(
            &client,
            DavCall::propfind(&url_to_href(&principal_url), 0, multistatus::CALENDAR_HOME_SET),
        )
        .await?;
        check_status(&reply, "Calendar home discovery")?;
        let home = multistatus::property_href(&reply.body, "calendar-home-set")
            .map_err(invalid_xml)?
            .ok_or_else(|| missing_property("calendar-home-set"))?;
        let home_url = absolute_url(&home, &principal_url);

        tracing::info!(calendar_home = %home_url, "Discovered iCloud calendar home");
        Ok(home_url)
    }

    async fn list_calendars(&self, home_url: &str) -> SinkResult<Vec<DavEntry>> {
        let client = create_caldav_client(home_url, &self.credentials)?;
        let reply = send(
            &client,
            DavCall::propfind(&url_to_href(home_url), 1, multistatus::LIST_CALENDARS),
        )
        .await?;
        check_status(&reply, "Listing calendars")?;

        let entries = multistatus::parse_multistatus(&reply.body).map_err(invalid_xml)?;
        Ok(entries
            .into_iter()
            .filter(|entry| entry.is_calendar && !same_resource(&entry.href, home_url))
            .collect())
    }

    async fn make_calendar(&self, home_url: &str, name: &str, color: &str) -> SinkResult<String> {
        let client = create_caldav_client(home_url, &self.credentials)?;
        let body = multistatus::mkcalendar_body(name, color);

        let base = slug::slugify(name);
        let first = if base.is_empty() {
            uuid::Uuid::new_v4().to_string()
        } else {
            base
        };
        let candidates = [
            first.clone(),
            format!("{}-{}", first, uuid::Uuid::new_v4().simple()),
        ];

        for segment in candidates {
            let url = format!("{}/{}/", home_url.trim_end_matches('/'), segment);
            let reply = send(&client, DavCall::mkcalendar(&url_to_href(&url), &body)).await?;

            // 405: a collection already lives at this path
            if reply.status == StatusCode::METHOD_NOT_ALLOWED {
                tracing::debug!(url = %url, "Calendar path taken; trying another");
                continue;
            }
            check_status(&reply, "Creating calendar")?;
            tracing::info!(calendar = name, url = %url, "Created iCloud calendar");
            return Ok(url);
        }

        Err(SinkError::Rejected {
            status: StatusCode::METHOD_NOT_ALLOWED.as_u16(),
            message: format!("Could not find a free path for calendar '{}'", name),
        })
    }

    async fn put_event(&self, url: &str, event: &DesiredEvent) -> SinkResult<()> {
        let client = create_caldav_client(url, &self.credentials)?;
        let ics = generate_ics(event);
        let reply = send(&client, DavCall::put_ics(&url_to_href(url), &ics)).await?;
        check_status(&reply, "Writing event")
    }
}

#[async_trait]
impl CalendarSink for ICloudCalendarSink {
    async fn ensure_calendar(&self, name: &str, color: &str) -> SinkResult<CalendarIdentity> {
        let home_url = self.calendar_home().await?.to_string();

        let existing = self
            .list_calendars(&home_url)
            .await?
            .into_iter()
            .find(|entry| entry.display_name.as_deref() == Some(name));

        if let Some(entry) = existing {
            let href = absolute_url(&entry.href, &home_url);
            tracing::info!(calendar = name, href = %href, "Using existing iCloud calendar");
            return Ok(CalendarIdentity {
                href,
                name: name.to_string(),
                color: entry.color.unwrap_or_else(|| color.to_string()),
            });
        }

        let href = self.make_calendar(&home_url, name, color).await?;
        Ok(CalendarIdentity {
            href,
            name: name.to_string(),
            color: color.to_string(),
        })
    }

    async fn list_events(&self, calendar: &CalendarIdentity) -> SinkResult<Vec<RemoteEvent>> {
        let client = create_caldav_client(&calendar.href, &self.credentials)?;
        let reply = send(
            &client,
            DavCall::propfind(&url_to_href(&calendar.href), 1, multistatus::LIST_EVENTS),
        )
        .await?;
        check_status(&reply, "Listing events")?;

        let entries = multistatus::parse_multistatus(&reply.body).map_err(invalid_xml)?;
        let events: Vec<RemoteEvent> = entries
            .into_iter()
            .filter(|entry| !entry.is_collection && !same_resource(&entry.href, &calendar.href))
            .map(|entry| {
                let href = absolute_url(&entry.href, &calendar.href);
                RemoteEvent {
                    task_id: task_id_from_href(&href),
                    href,
                    etag: entry.etag,
                }
            })
            .collect();

        tracing::debug!(calendar = %calendar.name, count = events.len(), "Listed remote events");
        Ok(events)
    }

    async fn create_event(
        &self,
        calendar: &CalendarIdentity,
        event: &DesiredEvent,
    ) -> SinkResult<String> {
        let url = event_url(&calendar.href, &event.task_id);
        self.put_event(&url, event).await?;
        Ok(url)
    }

    async fn update_event(
        &self,
        calendar: &CalendarIdentity,
        href: &str,
        event: &DesiredEvent,
    ) -> SinkResult<()> {
        let url = absolute_url(href, &calendar.href);
        self.put_event(&url, event).await
    }

    async fn delete_event(&self, calendar: &CalendarIdentity, href: &str) -> SinkResult<()> {
        let url = absolute_url(href, &calendar.href);
        let client = create_caldav_client(&url, &self.credentials)?;
        let reply = send(&client, DavCall::delete(&url_to_href(&url))).await?;

        if reply.status == StatusCode::NOT_FOUND {
            tracing::debug!(href = %url, "Event already gone");
            return Ok(());
        }
        check_status(&reply, "Deleting event")
    }
}

fn invalid_xml(e: roxmltree::Error) -> SinkError {
    SinkError::Unavailable(format!("Invalid multistatus response: {}", e))
}

fn missing_property(name: &str) -> SinkError {
    SinkError::Rejected {
        status: StatusCode::MULTI_STATUS.as_u16(),
        message: format!("Server did not report {}", name),
    }
}
