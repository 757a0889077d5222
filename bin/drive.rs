//! Google Drive content source.
//!
//! Lists `.txt` files in a Drive folder through the v3 REST API and
//! downloads their bodies. Token acquisition happens outside the binary;
//! an OAuth access token is passed in.
//!
//! Items are identified by file name, the same id the local posts folder
//! uses, so a run served by the local fallback keeps the rotation cursor
//! meaningful for the next Drive run.

use std::{collections::HashSet, future::Future, time::Duration};

use chrono::{DateTime, Utc};
use reqwest::StatusCode;
use rotapost::{ContentItem, ContentSource, RawContentItem, ScopeKey, SourceError};
use serde::Deserialize;
use tracing::{debug, warn};

/// Page of a `files.list` response.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileList {
    /// Files on this page.
    #[serde(default)]
    pub files: Vec<DriveFile>,
    /// Token for the next page, if any.
    pub next_page_token: Option<String>,
}

/// File metadata as listed by Drive.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DriveFile {
    /// Drive file id, used to download the body.
    pub id: Option<String>,
    /// File name, used as the item id.
    pub name: Option<String>,
    /// Creation time.
    pub created_time: Option<DateTime<Utc>>,
}

impl DriveFile {
    /// Converts listing metadata plus the downloaded body into a raw record.
    pub fn into_raw(self, body: Option<String>) -> RawContentItem {
        RawContentItem {
            id: self.name.clone(),
            name: self.name,
            created_at: self.created_time,
            body: body.map(|b| b.trim().to_string()),
        }
    }
}

/// The two Drive calls the source needs.
pub trait DriveApi: Send + Sync {
    /// Fetches one page of files matching `query`.
    fn list_page(
        &self,
        query: &str,
        page_token: Option<&str>,
    ) -> impl Future<Output = Result<FileList, SourceError>> + Send;

    /// Downloads the contents of `file_id`.
    fn download(&self, file_id: &str) -> impl Future<Output = Result<String, SourceError>> + Send;
}

/// [`DriveApi`] over HTTPS.
#[derive(Debug, Clone)]
pub struct HttpDriveApi {
    client: reqwest::Client,
    api_base: String,
    token: String,
}

impl HttpDriveApi {
    /// Creates a client for `api_base` authenticated with `token`.
    pub fn new(
        api_base: impl Into<String>,
        token: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, SourceError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| SourceError::Config(format!("cannot build http client: {e}")))?;
        Ok(Self {
            client,
            api_base: api_base.into().trim_end_matches('/').to_string(),
            token: token.into(),
        })
    }
}

impl DriveApi for HttpDriveApi {
    async fn list_page(
        &self,
        query: &str,
        page_token: Option<&str>,
    ) -> Result<FileList, SourceError> {
        let mut params = vec![
            ("q", query),
            ("fields", "nextPageToken, files(id, name, createdTime)"),
            ("orderBy", "createdTime desc"),
            ("pageSize", "100"),
        ];
        if let Some(token) = page_token {
            params.push(("pageToken", token));
        }

        let response = self
            .client
            .get(format!("{}/files", self.api_base))
            .bearer_auth(&self.token)
            .query(&params)
            .send()
            .await
            .map_err(|e| SourceError::Unavailable(format!("files.list request failed: {e}")))?;

        match response.status() {
            status if status.is_success() => response
                .json::<FileList>()
                .await
                .map_err(|e| SourceError::Unavailable(format!("bad files.list response: {e}"))),
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Err(SourceError::Config(format!(
                "drive rejected credentials ({})",
                response.status()
            ))),
            status => Err(SourceError::Unavailable(format!("files.list returned {status}"))),
        }
    }

    async fn download(&self, file_id: &str) -> Result<String, SourceError> {
        let response = self
            .client
            .get(format!("{}/files/{file_id}", self.api_base))
            .bearer_auth(&self.token)
            .query(&[("alt", "media")])
            .send()
            .await
            .map_err(|e| SourceError::Unavailable(format!("download of {file_id} failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(SourceError::Unavailable(format!(
                "download of {file_id} returned {status}"
            )));
        }
        response
            .text()
            .await
            .map_err(|e| SourceError::Unavailable(format!("cannot read body of {file_id}: {e}")))
    }
}

/// Content source backed by a Google Drive folder.
///
/// A listing failure fails the whole call. A file whose body cannot be
/// downloaded is skipped for this run, as is a second file reusing the name
/// of a newer one.
#[derive(Debug, Clone)]
pub struct DriveSource<A = HttpDriveApi> {
    api: A,
    folder_id: String,
}

impl DriveSource {
    /// Creates a Drive source talking to `api_base`.
    pub fn new(
        api_base: impl Into<String>,
        folder_id: impl Into<String>,
        token: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, SourceError> {
        Ok(Self::with_api(HttpDriveApi::new(api_base, token, timeout)?, folder_id))
    }
}

impl<A> DriveSource<A> {
    /// Creates a Drive source over an existing API client.
    pub fn with_api(api: A, folder_id: impl Into<String>) -> Self {
        Self { api, folder_id: folder_id.into() }
    }

    /// The `q` parameter selecting text files in the folder.
    pub fn query(&self) -> String {
        format!("'{}' in parents and name contains '.txt' and trashed=false", self.folder_id)
    }
}

impl<A: DriveApi> DriveSource<A> {
    async fn list_files(&self) -> Result<Vec<DriveFile>, SourceError> {
        let query = self.query();
        let mut files = Vec::new();
        let mut page_token: Option<String> = None;
        loop {
            let page = self.api.list_page(&query, page_token.as_deref()).await?;
            files.extend(page.files);
            match page.next_page_token {
                Some(next) => page_token = Some(next),
                None => break,
            }
        }
        Ok(files)
    }
}

impl<A: DriveApi> ContentSource for DriveSource<A> {
    async fn list_items(&self, scope: &ScopeKey) -> Result<Vec<ContentItem>, SourceError> {
        let files = self.list_files().await?;
        debug!(scope = %scope, folder = %self.folder_id, count = files.len(), "listed drive files");

        let mut seen = HashSet::new();
        let mut items = Vec::with_capacity(files.len());
        for file in files {
            let (Some(file_id), Some(name)) = (file.id.clone(), file.name.clone()) else {
                warn!(?file, "skipping drive file without id or name");
                continue;
            };
            // Listed newest first, so the newest file keeps a shared name.
            if !seen.insert(name.clone()) {
                warn!(name = %name, file_id = %file_id, "skipping drive file with duplicate name");
                continue;
            }

            let body = match self.api.download(&file_id).await {
                Ok(body) => body,
                Err(e) => {
                    warn!(name = %name, error = %e, "skipping drive file that failed to download");
                    continue;
                }
            };
            match ContentItem::try_from(file.into_raw(Some(body))) {
                Ok(item) => items.push(item),
                Err(e) => warn!(name = %name, error = %e, "skipping invalid drive file"),
            }
        }
        Ok(items)
    }

    fn describe(&self) -> String {
        format!("drive:{}", self.folder_id)
    }
}

#[cfg(test)]
mod tests {
    use std::{
        collections::HashMap,
        sync::{
            atomic::{AtomicUsize, Ordering},
            Mutex,
        },
    };

    use chrono::TimeZone;
    use rotapost::{FallbackSource, LocalDirSource, RotationEngine, RotationState};

    use super::*;

    /// In-memory Drive: pages are addressed by their index as the page token.
    #[derive(Debug, Default)]
    struct FakeDrive {
        pages: Vec<FileList>,
        bodies: HashMap<String, String>,
        fail_odd_listings: bool,
        listings: AtomicUsize,
        requested_tokens: Mutex<Vec<Option<String>>>,
    }

    impl FakeDrive {
        fn single_page(files: Vec<DriveFile>) -> Self {
            let bodies = files
                .iter()
                .filter_map(|f| Some((f.id.clone()?, format!("body of {}", f.name.clone()?))))
                .collect();
            Self {
                pages: vec![FileList { files, next_page_token: None }],
                bodies,
                ..Self::default()
            }
        }
    }

    impl DriveApi for FakeDrive {
        async fn list_page(
            &self,
            _query: &str,
            page_token: Option<&str>,
        ) -> Result<FileList, SourceError> {
            self.requested_tokens.lock().unwrap().push(page_token.map(str::to_string));
            if page_token.is_none() {
                let call = self.listings.fetch_add(1, Ordering::SeqCst);
                if self.fail_odd_listings && call % 2 == 1 {
                    return Err(SourceError::Unavailable("503".to_string()));
                }
            }
            let index = page_token.map_or(0, |t| t.parse::<usize>().unwrap());
            Ok(self.pages[index].clone())
        }

        async fn download(&self, file_id: &str) -> Result<String, SourceError> {
            self.bodies
                .get(file_id)
                .cloned()
                .ok_or_else(|| SourceError::Unavailable(format!("download of {file_id} failed")))
        }
    }

    fn ts(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(secs, 0).unwrap()
    }

    fn file(id: &str, name: &str, created: i64) -> DriveFile {
        DriveFile {
            id: Some(id.to_string()),
            name: Some(name.to_string()),
            created_time: Some(ts(created)),
        }
    }

    fn names(items: &[ContentItem]) -> Vec<String> {
        items.iter().map(|i| i.id.to_string()).collect()
    }

    #[test]
    fn test_file_list_parse() {
        let json = r#"{
            "nextPageToken": "abc",
            "files": [
                {"id": "1", "name": "monday.txt", "createdTime": "2024-03-01T09:30:00.000Z"},
                {"id": "2", "name": "no-time.txt"}
            ]
        }"#;
        let list: FileList = serde_json::from_str(json).unwrap();
        assert_eq!(list.next_page_token.as_deref(), Some("abc"));
        assert_eq!(list.files.len(), 2);
        assert!(list.files[0].created_time.is_some());
        assert!(list.files[1].created_time.is_none());
    }

    #[test]
    fn test_empty_listing_parse() {
        let list: FileList = serde_json::from_str("{}").unwrap();
        assert!(list.files.is_empty());
        assert!(list.next_page_token.is_none());
    }

    #[test]
    fn test_drive_file_conversion_uses_name_as_id() {
        let file = file("1AbC", "monday.txt", 100);
        let item = ContentItem::try_from(file.clone().into_raw(Some("  Hello\n".into()))).unwrap();
        assert_eq!(item.id.as_str(), "monday.txt");
        assert_eq!(item.body, "Hello");
        assert_eq!(item.label(), "monday.txt");

        let missing_time = DriveFile { created_time: None, ..file };
        assert!(ContentItem::try_from(missing_time.into_raw(Some("x".into()))).is_err());
    }

    #[test]
    fn test_query_targets_folder() {
        let source =
            DriveSource::new("https://example.test/drive/v3/", "F1", "tok", Duration::from_secs(1))
                .unwrap();
        assert_eq!(source.query(), "'F1' in parents and name contains '.txt' and trashed=false");
        assert_eq!(source.api.api_base, "https://example.test/drive/v3");
        assert_eq!(source.describe(), "drive:F1");
    }

    #[tokio::test]
    async fn test_list_items_follows_page_tokens() {
        let mut drive = FakeDrive::single_page(vec![file("f3", "c.txt", 300)]);
        drive.pages[0].next_page_token = Some("1".to_string());
        drive.pages.push(FileList {
            files: vec![file("f2", "b.txt", 200), file("f1", "a.txt", 100)],
            next_page_token: None,
        });
        drive.bodies.insert("f2".to_string(), "body of b.txt".to_string());
        drive.bodies.insert("f1".to_string(), "body of a.txt".to_string());

        let source = DriveSource::with_api(drive, "F1");
        let items = source.list_items(&ScopeKey::default()).await.unwrap();

        assert_eq!(names(&items), ["c.txt", "b.txt", "a.txt"]);
        assert_eq!(items[1].body, "body of b.txt");
        assert_eq!(
            *source.api.requested_tokens.lock().unwrap(),
            [None, Some("1".to_string())]
        );
    }

    #[tokio::test]
    async fn test_failed_download_skips_only_that_file() {
        let mut drive = FakeDrive::single_page(vec![
            file("f3", "c.txt", 300),
            file("f2", "b.txt", 200),
            file("f1", "a.txt", 100),
        ]);
        drive.bodies.remove("f2");

        let source = DriveSource::with_api(drive, "F1");
        let items = source.list_items(&ScopeKey::default()).await.unwrap();
        assert_eq!(names(&items), ["c.txt", "a.txt"]);
    }

    #[tokio::test]
    async fn test_incomplete_and_duplicate_files_are_skipped() {
        let mut drive = FakeDrive::single_page(vec![
            file("new", "same.txt", 300),
            file("old", "same.txt", 100),
            DriveFile { name: None, ..file("anon", "x", 200) },
            file("blank", "blank.txt", 150),
        ]);
        drive.bodies.insert("blank".to_string(), "   ".to_string());

        let source = DriveSource::with_api(drive, "F1");
        let items = source.list_items(&ScopeKey::default()).await.unwrap();
        assert_eq!(names(&items), ["same.txt"]);
        assert_eq!(items[0].body, "body of same.txt");
    }

    #[tokio::test]
    async fn test_listing_failure_fails_the_call() {
        let drive = FakeDrive { fail_odd_listings: true, ..FakeDrive::default() };
        drive.listings.store(1, Ordering::SeqCst);
        let source = DriveSource::with_api(drive, "F1");
        let err = source.list_items(&ScopeKey::default()).await.unwrap_err();
        assert_eq!(err, SourceError::Unavailable("503".to_string()));
    }

    #[tokio::test]
    async fn test_rotation_survives_intermittent_drive_outages() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["a.txt", "b.txt", "c.txt"] {
            std::fs::write(dir.path().join(name), format!("local copy of {name}")).unwrap();
            std::thread::sleep(Duration::from_millis(20));
        }

        let mut drive = FakeDrive::single_page(vec![
            file("f3", "c.txt", 300),
            file("f2", "b.txt", 200),
            file("f1", "a.txt", 100),
        ]);
        drive.fail_odd_listings = true;
        let source = FallbackSource::new(
            DriveSource::with_api(drive, "F1"),
            LocalDirSource::new(dir.path()),
        );

        let scope = ScopeKey::default();
        let mut state = RotationState::never_run(scope.clone());
        let mut seen = Vec::new();
        for run in 0..6 {
            let items = source.list_items(&scope).await.unwrap();
            let selection = RotationEngine::select(&items, &state, ts(1_000 + run)).unwrap();
            seen.push((selection.item.id.to_string(), selection.next_state.cycle_count));
            state = selection.next_state;
        }

        let expected: Vec<(String, u64)> = vec![
            ("c.txt".to_string(), 1),
            ("b.txt".to_string(), 1),
            ("a.txt".to_string(), 1),
            ("c.txt".to_string(), 2),
            ("b.txt".to_string(), 2),
            ("a.txt".to_string(), 2),
        ];
        assert_eq!(seen, expected);
    }
}
