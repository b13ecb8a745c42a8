//! Starts downloads from unlocked mounts and tracks them in the registry

use log::info;
use range_dl::RangeDownloader;
use reqwest::Client;
use std::path::{Path, PathBuf};

use super::naming::Reservations;
use super::registry::TransferRegistry;
use super::types::{RemoteFileRef, TaskId};
use super::worker::{self, DownloadJob};
use crate::config::{ClientConfig, ConfigError};
use crate::mount::MountCredential;
use crate::webdav::{build_url, resolve_path};

pub struct DownloadManager {
    registry: TransferRegistry,
    downloader: RangeDownloader,
    downloads_dir: PathBuf,
    reservations: Reservations,
}

impl DownloadManager {
    pub fn new(
        registry: TransferRegistry,
        downloader: RangeDownloader,
        downloads_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            registry,
            downloader,
            downloads_dir: downloads_dir.into(),
            reservations: Reservations::default(),
        }
    }

    pub fn from_config(
        config: &ClientConfig,
        client: Client,
        registry: TransferRegistry,
    ) -> Result<Self, ConfigError> {
        let downloader = RangeDownloader::new(client, config.download.clone())?;
        Ok(Self::new(registry, downloader, config.downloads_dir()))
    }

    pub fn registry(&self) -> &TransferRegistry {
        &self.registry
    }

    pub fn downloads_dir(&self) -> &Path {
        &self.downloads_dir
    }

    /// Register a task for `file` and download it in the background.
    ///
    /// Must be called from within a tokio runtime. Progress and the final
    /// state are observable through the registry under the returned id.
    pub fn start_download(&self, mount: &MountCredential, file: RemoteFileRef) -> TaskId {
        let mismatch = file.mount_id != mount.mount_id;
        let url = build_url(&mount.endpoint_url, &resolve_path(mount, &file.path));
        let task_id = self.registry.register(file.clone());

        if mismatch {
            self.registry.fail(
                &task_id,
                format!(
                    "{} ({}): file belongs to mount {}, not {}",
                    mount.name, file.path, file.mount_id, mount.mount_id
                ),
            );
            return task_id;
        }

        info!(
            "download_queued: {} mount={} path={}",
            task_id, mount.mount_id, file.path
        );
        let job = DownloadJob {
            registry: self.registry.clone(),
            downloader: self.downloader.clone(),
            reservations: self.reservations.clone(),
            downloads_dir: self.downloads_dir.clone(),
            task_id: task_id.clone(),
            file,
            url,
            auth: mount.basic_auth(),
            mount_name: mount.name.clone(),
        };
        tokio::spawn(worker::run(job));
        task_id
    }

    /// Cancel a pending or running download; no-op for unknown or finished tasks
    pub fn cancel(&self, task_id: &TaskId) -> bool {
        self.registry.cancel(task_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::download::TaskStatus;
    use range_dl::{RangeDownloadConfig, Strategy};
    use std::sync::Arc;
    use std::time::Duration;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, Request, Respond, ResponseTemplate};

    const MIB: usize = 1024 * 1024;

    /// Honors `Range: bytes=s-e` with a 206 slice, otherwise serves the whole body
    struct RangeServer {
        body: Arc<Vec<u8>>,
    }

    impl Respond for RangeServer {
        fn respond(&self, request: &Request) -> ResponseTemplate {
            let range = request
                .headers
                .get("range")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.strip_prefix("bytes="))
                .and_then(|v| v.split_once('-'))
                .and_then(|(s, e)| Some((s.parse::<usize>().ok()?, e.parse::<usize>().ok()?)));
            match range {
                Some((start, end)) => {
                    ResponseTemplate::new(206).set_body_bytes(self.body[start..=end].to_vec())
                }
                None => ResponseTemplate::new(200).set_body_bytes(self.body.as_ref().clone()),
            }
        }
    }

    fn body(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i % 253) as u8).collect()
    }

    fn mount(server: &MockServer) -> MountCredential {
        MountCredential {
            mount_id: 9,
            name: "team-share".into(),
            endpoint_url: format!("{}/dav", server.uri()),
            root_path: "/files".into(),
            username: "bob".into(),
            password: "pw".into(),
        }
    }

    fn manager(dir: &Path) -> DownloadManager {
        let downloader =
            RangeDownloader::new(Client::new(), RangeDownloadConfig::default()).unwrap();
        DownloadManager::new(TransferRegistry::new(), downloader, dir)
    }

    #[tokio::test]
    async fn downloads_in_parallel_and_records_strategy() {
        let content = body(6 * MIB);
        let server = MockServer::start().await;
        // base64("bob:pw")
        Mock::given(method("GET"))
            .and(path("/dav/files/videos/clip%20one.mp4"))
            .and(header("authorization", "Basic Ym9iOnB3"))
            .respond_with(RangeServer {
                body: Arc::new(content.clone()),
            })
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let manager = manager(dir.path());
        let file = RemoteFileRef::new(9, "videos/clip one.mp4", content.len() as i64);

        let id = manager.start_download(&mount(&server), file);
        let task = manager.registry().wait_finished(&id).await.unwrap();

        assert_eq!(task.status, TaskStatus::Completed, "{:?}", task.error_message);
        assert_eq!(task.strategy, Some(Strategy::Parallel { ranges: 4 }));
        assert_eq!(task.downloaded_bytes, content.len() as u64);
        assert_eq!(task.percent, 100);
        let local = task.local_path.unwrap();
        assert_eq!(local, dir.path().join("clip one.mp4"));
        assert_eq!(std::fs::read(local).unwrap(), content);
    }

    #[tokio::test]
    async fn second_download_gets_numbered_name() {
        let content = body(1024);
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(RangeServer {
                body: Arc::new(content.clone()),
            })
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let manager = manager(dir.path());
        let mount = mount(&server);

        let first = manager.start_download(&mount, RemoteFileRef::new(9, "notes.txt", 1024));
        let first = manager.registry().wait_finished(&first).await.unwrap();
        let second = manager.start_download(&mount, RemoteFileRef::new(9, "notes.txt", 0));
        let second = manager.registry().wait_finished(&second).await.unwrap();

        assert_eq!(first.local_path.unwrap(), dir.path().join("notes.txt"));
        assert_eq!(second.local_path.unwrap(), dir.path().join("notes(1).txt"));
        assert_eq!(second.strategy, Some(Strategy::Sequential));
    }

    #[tokio::test]
    async fn failure_message_names_the_mount() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let manager = manager(dir.path());
        let id = manager.start_download(&mount(&server), RemoteFileRef::new(9, "gone.bin", 10));
        let task = manager.registry().wait_finished(&id).await.unwrap();

        assert_eq!(task.status, TaskStatus::Failed);
        let message = task.error_message.unwrap();
        assert!(message.starts_with("team-share (gone.bin)"), "{}", message);
        assert!(message.contains("404"));
        assert_eq!(task.local_path, None);
        assert!(std::fs::read_dir(dir.path()).unwrap().next().is_none());
    }

    #[tokio::test]
    async fn cancel_leaves_no_files_and_never_completes() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(206).set_delay(Duration::from_secs(30)))
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let manager = manager(dir.path());
        let id = manager.start_download(
            &mount(&server),
            RemoteFileRef::new(9, "big.iso", 32 * MIB as i64),
        );

        // wait until the worker has started
        let mut updates = manager.registry().subscribe();
        loop {
            let downloading = updates
                .borrow_and_update()
                .iter()
                .any(|t| t.id == id && t.status == TaskStatus::Downloading);
            if downloading {
                break;
            }
            updates.changed().await.unwrap();
        }
        tokio::time::sleep(Duration::from_millis(100)).await;

        assert!(manager.cancel(&id));
        assert!(!manager.cancel(&id));

        let task = manager.registry().wait_finished(&id).await.unwrap();
        assert_eq!(task.status, TaskStatus::Canceled);

        // give the worker time to observe the token and clean up
        tokio::time::timeout(Duration::from_secs(10), async {
            while std::fs::read_dir(dir.path()).unwrap().next().is_some() {
                tokio::time::sleep(Duration::from_millis(20)).await;
            }
        })
        .await
        .expect("partial file was not removed");
        assert_eq!(
            manager.registry().get(&id).unwrap().status,
            TaskStatus::Canceled
        );
    }

    #[tokio::test]
    async fn mount_mismatch_fails_without_request() {
        let server = MockServer::start().await;
        let dir = tempfile::tempdir().unwrap();
        let manager = manager(dir.path());

        let id = manager.start_download(&mount(&server), RemoteFileRef::new(1, "a.bin", 10));
        let task = manager.registry().get(&id).unwrap();
        assert_eq!(task.status, TaskStatus::Failed);
        assert!(server.received_requests().await.unwrap().is_empty());
    }
}
