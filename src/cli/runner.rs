//! Command execution: wires configuration, session state and the transfer job

use crate::archive::ArchivePackage;
use crate::cli::args::{Args, Command, ConnectionArgs, ResumeArgs, TransferArgs, UploadArgs};
use crate::config::{AppConfig, AuthConfig, EndpointConfig, UploadConfig};
use crate::error::{PusherError, Result};
use crate::hypervisor::DatastoreClient;
use crate::output::{OutputManager, format_duration, format_size};
use crate::retry::RetrySpec;
use crate::session::{SessionStore, SessionTracker, UploadSession};
use crate::transfer::{TransferJob, TransferReport, TransferSettings};
use crate::upload::{FileRangeSource, HttpChunkTransport, build_http_client};
use std::io::{self, BufRead, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

const PROGRESS_INTERVAL: Duration = Duration::from_secs(2);
const PROGRESS_BAR_WIDTH: usize = 30;

/// Everything needed to start or continue one upload
struct UploadRequest {
    archive_path: PathBuf,
    host: String,
    datastore: String,
    vm_name: Option<String>,
    network: String,
    connection: ConnectionArgs,
    transfer: TransferArgs,
    resume: ResumeFrom,
}

enum ResumeFrom {
    Fresh,
    /// Most recent session, or the one with this id
    Lookup(Option<String>),
    File(PathBuf),
}

pub struct Runner {
    args: Args,
    output: OutputManager,
    store: SessionStore,
    cancel: CancellationToken,
}

impl Runner {
    pub fn new(args: Args, cancel: CancellationToken) -> Self {
        let output = if args.quiet {
            OutputManager::new_quiet()
        } else {
            OutputManager::new(args.verbose)
        };

        Self {
            args,
            output,
            store: SessionStore::current_dir(),
            cancel,
        }
    }

    /// Looks for session files in `store` instead of the current directory.
    pub fn with_store(mut self, store: SessionStore) -> Self {
        self.store = store;
        self
    }

    pub fn output(&self) -> &OutputManager {
        &self.output
    }

    pub async fn run(&self) -> Result<()> {
        match &self.args.command {
            Command::Upload(args) => self.upload(args).await,
            Command::ListSessions => self.list_sessions(),
            Command::Resume(args) => self.resume(args).await,
            Command::CleanSessions { yes } => self.clean_sessions(*yes),
        }
    }

    async fn upload(&self, args: &UploadArgs) -> Result<()> {
        let resume = if args.resume {
            ResumeFrom::Lookup(args.session_id.clone())
        } else {
            ResumeFrom::Fresh
        };

        self.execute(UploadRequest {
            archive_path: args.ova.clone(),
            host: args.host.clone(),
            datastore: args.datastore.clone(),
            vm_name: args.vm_name.clone(),
            network: args.network.clone(),
            connection: args.connection.clone(),
            transfer: args.transfer.clone(),
            resume,
        })
        .await
    }

    async fn resume(&self, args: &ResumeArgs) -> Result<()> {
        let path = self.locate_session(args.session_id.as_deref())?.ok_or_else(|| {
            PusherError::Session("no upload sessions found in the current directory".to_string())
        })?;
        let session = SessionTracker::load_from(&path)?;

        if session.is_completed {
            self.output.info(&format!(
                "Session {}: all disks uploaded ({}), finishing VM creation",
                session.session_id,
                format_size(session.uploaded_size)
            ));
        } else {
            self.output.info(&format!(
                "Resuming session {} ({:.1}% done, {}/{} disks)",
                session.session_id,
                session.percentage(),
                session.completed_items(),
                session.files.len()
            ));
        }

        self.execute(UploadRequest {
            archive_path: PathBuf::from(&session.archive_path),
            host: session.host.clone(),
            datastore: session.datastore.clone(),
            vm_name: Some(session.vm_name.clone()),
            network: args.network.clone(),
            connection: args.connection.clone(),
            transfer: args.transfer.clone(),
            resume: ResumeFrom::File(path),
        })
        .await
    }

    async fn execute(&self, request: UploadRequest) -> Result<()> {
        self.output.section("OVA Upload");

        let password = match request.connection.password.clone() {
            Some(password) => Some(password),
            None => Some(prompt_line(&format!(
                "Password for {}@{}: ",
                request.connection.username, request.host
            ))?),
        };
        let config = self.build_config(&request, password)?;
        config.validate()?;

        self.output.step(&format!("Archive: {}", config.archive_path.display()));
        self.output.step(&format!(
            "Target: {} / {} as '{}'",
            config.endpoint.host, config.endpoint.datastore, config.vm_name
        ));
        self.output.detail(&format!(
            "chunk size {}, {} worker(s), {} mode",
            format_size(config.upload.chunk_size),
            config.upload.workers,
            if config.upload.stream { "streaming" } else { "extraction" }
        ));

        let archive_path = config.archive_path.clone();
        let package = tokio::task::spawn_blocking(move || ArchivePackage::index(&archive_path)).await??;
        self.describe_package(&package);

        let tracker = Arc::new(self.open_tracker(&request.resume, &config)?);
        self.output.detail(&format!("Session file: {}", tracker.session_file().display()));

        let report = self.transfer(config, package, Arc::clone(&tracker)).await;
        match report {
            Ok(report) => {
                self.print_report(&report);
                Ok(())
            }
            Err(e) => {
                if e.is_cancelled() {
                    self.output.warning("Upload interrupted");
                }
                self.output.info(&format!(
                    "Progress saved to {}. Run `ova-pusher resume --session-id {}` to continue.",
                    tracker.session_file().display(),
                    tracker.session_id()
                ));
                Err(e)
            }
        }
    }

    fn build_config(&self, request: &UploadRequest, password: Option<String>) -> Result<AppConfig> {
        let transfer = &request.transfer;
        let base_delay = seconds("base delay", transfer.base_delay)?;
        let max_delay = seconds("max delay", transfer.max_delay)?;

        Ok(AppConfig {
            vm_name: request
                .vm_name
                .clone()
                .unwrap_or_else(|| AppConfig::default_vm_name(&request.archive_path)),
            archive_path: request.archive_path.clone(),
            network: request.network.clone(),
            endpoint: EndpointConfig {
                host: request.host.clone(),
                datastore: request.datastore.clone(),
                skip_tls: request.connection.insecure,
            },
            auth: AuthConfig {
                username: request.connection.username.clone(),
                password,
            },
            upload: UploadConfig {
                chunk_size: transfer.chunk_size,
                workers: transfer.workers,
                stream: transfer.stream,
                verify_checksums: transfer.verify_checksums,
                ..UploadConfig::default()
            },
            retry: RetrySpec::infinite()
                .with_max_attempts(transfer.max_retries)
                .with_delays(base_delay, max_delay),
            session_dir: self.store.directory().to_path_buf(),
        })
    }

    fn describe_package(&self, package: &ArchivePackage) {
        self.output.step(&format!(
            "Found {} disk(s), {} to upload",
            package.payloads.len(),
            format_size(package.total_payload_size())
        ));
        for payload in &package.payloads {
            self.output.detail(&format!(
                "{} ({}, offset {})",
                payload.name,
                format_size(payload.size),
                payload.offset
            ));
        }
        if package.manifest.is_none() {
            self.output.verbose("Archive has no manifest; checksums cannot be verified");
        }
    }

    fn locate_session(&self, session_id: Option<&str>) -> Result<Option<PathBuf>> {
        match session_id {
            Some(id) => self
                .store
                .find_by_id(id)?
                .map(Some)
                .ok_or_else(|| PusherError::Session(format!("session {} not found", id))),
            None => self.store.most_recent(),
        }
    }

    fn open_tracker(&self, resume: &ResumeFrom, config: &AppConfig) -> Result<SessionTracker> {
        let existing = match resume {
            ResumeFrom::Fresh => None,
            ResumeFrom::Lookup(session_id) => {
                let found = self.locate_session(session_id.as_deref())?;
                if found.is_none() {
                    self.output.info("No previous session found, starting a new upload");
                }
                found
            }
            ResumeFrom::File(path) => Some(path.clone()),
        };

        if let Some(path) = existing {
            let tracker = SessionTracker::resume(&path, config.upload.chunk_size)?;
            let session = tracker.snapshot();
            if Path::new(&session.archive_path) != config.archive_path {
                self.output.warning(&format!(
                    "Session {} was created for {}, continuing with {}",
                    session.session_id,
                    session.archive_path,
                    config.archive_path.display()
                ));
            }
            self.output.step(&format!(
                "Resuming session {}: {:.1}% done, {} retries so far",
                session.session_id,
                session.percentage(),
                session.retry_attempts
            ));
            return Ok(tracker);
        }

        let session_id = UploadSession::generate_id();
        let session = UploadSession::new(
            &session_id,
            &config.archive_path.to_string_lossy(),
            &config.endpoint.host,
            &config.endpoint.datastore,
            &config.vm_name,
        );
        let tracker = SessionTracker::new(
            session,
            self.store.session_path(&session_id),
            config.upload.chunk_size,
        );
        tracker.persist_now()?;
        self.output.step(&format!("Started session {}", session_id));
        Ok(tracker)
    }

    async fn transfer(
        &self,
        config: AppConfig,
        package: ArchivePackage,
        tracker: Arc<SessionTracker>,
    ) -> Result<TransferReport> {
        let http = build_http_client(&config.endpoint, config.upload.chunk_timeout)?;
        let hypervisor = DatastoreClient::new(http.clone(), &config.endpoint, config.auth.clone())?;
        let transport = HttpChunkTransport::new(http, config.auth.clone(), config.upload.chunk_timeout);

        let settings = TransferSettings {
            vm_name: config.vm_name.clone(),
            datastore: config.endpoint.datastore.clone(),
            network: config.network.clone(),
            upload: config.upload.clone(),
            retry: config.retry.clone(),
            work_dir: std::env::temp_dir(),
        };

        let output = self.output.clone();
        let job = TransferJob::new(
            package,
            settings,
            Arc::clone(&tracker),
            Arc::new(hypervisor),
            Arc::new(FileRangeSource),
            Arc::new(transport),
        )
        .with_retry_callback(Arc::new(move |item: &str, attempt: u32, error: &PusherError, delay: Duration| {
            output.warning(&format!(
                "{}: attempt {} failed ({}), retrying in {}",
                item,
                attempt,
                error,
                format_duration(delay)
            ));
        }));

        self.output.section("Uploading");
        let ticker = self.spawn_progress_ticker(Arc::clone(&tracker));
        let result = job.run(&self.cancel).await;
        ticker.abort();
        self.output.progress_line(&tracker.progress_bar(PROGRESS_BAR_WIDTH));
        self.output.progress_done();
        result
    }

    fn spawn_progress_ticker(&self, tracker: Arc<SessionTracker>) -> tokio::task::JoinHandle<()> {
        let output = self.output.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(PROGRESS_INTERVAL);
            loop {
                interval.tick().await;
                let eta = tracker
                    .eta()
                    .map(format_duration)
                    .unwrap_or_else(|| "--".to_string());
                output.progress_line(&format!(
                    "{} {}/s ETA {}",
                    tracker.progress_bar(PROGRESS_BAR_WIDTH),
                    format_size(tracker.upload_speed() as u64),
                    eta
                ));
            }
        })
    }

    fn print_report(&self, report: &TransferReport) {
        let session = &report.session;
        let secs = report.elapsed.as_secs_f64();
        let speed = if secs > 0.0 {
            format!("{}/s", format_size((session.uploaded_size as f64 / secs) as u64))
        } else {
            "n/a".to_string()
        };

        self.output.success(&format!("VM '{}' deployed to {}", session.vm_name, session.datastore));
        self.output.summary(
            "Upload Summary",
            &[
                ("Session", session.session_id.clone()),
                ("Disks uploaded", report.items_uploaded.to_string()),
                ("Disks skipped", report.items_skipped.to_string()),
                ("Data", format_size(session.uploaded_size)),
                ("Retries", session.retry_attempts.to_string()),
                ("Duration", format_duration(report.elapsed)),
                ("Average speed", speed),
            ],
        );
    }

    fn list_sessions(&self) -> Result<()> {
        let sessions = self.store.load_all()?;
        if sessions.is_empty() {
            self.output.info("No upload sessions found");
            return Ok(());
        }

        self.output.section(&format!("Upload sessions ({})", sessions.len()));
        for (path, session) in &sessions {
            let state = if session.is_completed { "complete" } else { "incomplete" };
            self.output.summary(
                &format!("{} [{}]", session.session_id, state),
                &[
                    ("File", path.display().to_string()),
                    ("Archive", session.archive_path.clone()),
                    ("Host", session.host.clone()),
                    ("Datastore", session.datastore.clone()),
                    ("VM", session.vm_name.clone()),
                    (
                        "Progress",
                        format!(
                            "{:.1}% ({}/{})",
                            session.percentage(),
                            format_size(session.uploaded_size),
                            format_size(session.total_size)
                        ),
                    ),
                    (
                        "Disks",
                        format!("{}/{} complete", session.completed_items(), session.files.len()),
                    ),
                    ("Last update", session.last_update.format("%Y-%m-%d %H:%M:%S UTC").to_string()),
                    ("Retries", session.retry_attempts.to_string()),
                    (
                        "Duration",
                        format_duration(session.elapsed().to_std().unwrap_or_default()),
                    ),
                ],
            );
        }
        Ok(())
    }

    fn clean_sessions(&self, yes: bool) -> Result<()> {
        let sessions = self.store.find_sessions()?;
        if sessions.is_empty() {
            self.output.info("No upload sessions found");
            return Ok(());
        }

        if !yes {
            let answer = prompt_line(&format!(
                "Delete {} session file(s)? [y/N]: ",
                sessions.len()
            ))?;
            if !matches!(answer.trim().to_ascii_lowercase().as_str(), "y" | "yes") {
                self.output.info("Cancelled");
                return Ok(());
            }
        }

        let removed = self.store.remove_all()?;
        self.output.success(&format!("Removed {} session file(s)", removed));
        Ok(())
    }
}

fn seconds(label: &str, value: f64) -> Result<Duration> {
    Duration::try_from_secs_f64(value)
        .map_err(|_| PusherError::Validation(format!("{} must be a non-negative number of seconds", label)))
}

fn prompt_line(prompt: &str) -> Result<String> {
    print!("{}", prompt);
    io::stdout().flush()?;
    let mut line = String::new();
    io::stdin().lock().read_line(&mut line)?;
    Ok(line.trim_end_matches(['\r', '\n']).to_string())
}
