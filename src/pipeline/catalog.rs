use std::io;
use std::path::PathBuf;

use chrono::Utc;
use tracing::{debug, error, instrument, warn};
use uuid::Uuid;

use crate::errors::{Error, Result};
use crate::files::{self, is_video, resolve_within};
use crate::models::{
    Descriptor, EpisodeDescriptor, EpisodeFields, FeedEntry, FileRecord, Media, NewMedia,
    SeriesDescriptor,
};
use crate::pipeline::DownloadService;
use crate::sandbox::SandboxError;

impl DownloadService {
    /// Catalogs the files of a finished download. Every video file becomes a
    /// media record; the other files next to it are its attachments.
    ///
    /// A failing file is logged and skipped, its siblings are still processed.
    /// A failing rule is recorded once per call, not once per file.
    #[instrument(skip(self, entry, files), fields(title = %entry.title))]
    pub(crate) async fn catalog(
        &self,
        entry: &FeedEntry,
        rule_id: Option<i64>,
        item_id: Uuid,
        files: &[FileRecord],
    ) -> Vec<Media> {
        let (media_files, others): (Vec<&FileRecord>, Vec<&FileRecord>) = files
            .iter()
            .partition(|file| is_video(file.mimetype.as_deref()));

        let mut cataloged = Vec::with_capacity(media_files.len());
        let mut rule_failed = false;
        for file in media_files {
            let attachments: Vec<&FileRecord> = others
                .iter()
                .copied()
                .filter(|other| other.directory() == file.directory())
                .collect();
            let descriptor = match rule_id {
                Some(rule_id) => {
                    self.describe(rule_id, entry, file, files, &mut rule_failed)
                        .await
                }
                None => Descriptor::default(),
            };
            match self
                .catalog_media(entry, item_id, file, &attachments, descriptor)
                .await
            {
                Ok(media) => cataloged.push(media),
                Err(err) => error!(path = file.path, "failed to catalog media file: {err}"),
            }
        }
        debug!(media = cataloged.len(), "download cataloged");
        cataloged
    }

    /// Runs the rule's `describe` hook. Any failure yields an empty descriptor;
    /// the first one also goes to the rule's error log and sets `failed`.
    async fn describe(
        &self,
        rule_id: i64,
        entry: &FeedEntry,
        file: &FileRecord,
        files: &[FileRecord],
        failed: &mut bool,
    ) -> Descriptor {
        match self.try_describe(rule_id, entry, file, files).await {
            Ok(descriptor) => descriptor,
            Err(err) => {
                warn!(rule_id, path = file.path, "rule failed to describe file: {err}");
                if *failed {
                    return Descriptor::default();
                }
                *failed = true;
                if let Err(log_err) = self
                    .repositories
                    .rules
                    .insert_error_log(rule_id, &entry.to_json(), &err.to_string())
                    .await
                {
                    error!(rule_id, "failed to record rule error: {log_err}");
                }
                Descriptor::default()
            }
        }
    }

    async fn try_describe(
        &self,
        rule_id: i64,
        entry: &FeedEntry,
        file: &FileRecord,
        files: &[FileRecord],
    ) -> Result<Descriptor> {
        let rule = self
            .repositories
            .rules
            .find_rule(rule_id)
            .await
            .map_err(Error::database)?;
        let Some(code_path) = rule.and_then(|rule| rule.code_path) else {
            debug!(rule_id, "rule has no code");
            return Ok(Descriptor::default());
        };
        let script = match tokio::fs::read_to_string(&code_path).await {
            Ok(script) => script,
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                debug!(rule_id, code_path, "rule code file is missing");
                return Ok(Descriptor::default());
            }
            Err(err) => return Err(err.into()),
        };

        let entry = serde_json::to_string(entry)?;
        let file = serde_json::to_string(file)?;
        let files = serde_json::to_string(files)?;
        let sandbox = self.sandbox;
        let descriptor = self
            .files
            .pool()
            .run(move || -> Result<Descriptor, SandboxError> {
                let vm = sandbox.load(&script)?;
                let descriptor = vm.describe(&entry, &file, &files);
                vm.release();
                descriptor
            })
            .await??;
        Ok(descriptor)
    }

    async fn catalog_media(
        &self,
        entry: &FeedEntry,
        item_id: Uuid,
        file: &FileRecord,
        attachments: &[&FileRecord],
        descriptor: Descriptor,
    ) -> Result<Media> {
        let Descriptor {
            media: overrides,
            series,
            episode,
            save_path,
            overwrite_episode,
        } = descriptor;
        let overrides = overrides.unwrap_or_default();
        let media = self
            .repositories
            .catalog
            .insert_media(NewMedia {
                name: overrides.name.unwrap_or_else(|| file.name.clone()),
                description: overrides.description,
                is_public: overrides.is_public.unwrap_or(true),
                download_id: Some(item_id),
                file_id: Some(file.id),
                attachment_ids: attachments.iter().map(|attachment| attachment.id).collect(),
            })
            .await
            .map_err(Error::database)?;

        if let Err(err) = self.post_processor.process(&media, file).await {
            warn!(media_id = %media.id, "media post-processing failed: {err}");
        }

        if let Some(save_path) = save_path.as_deref() {
            self.link_to_index(save_path, file, attachments).await?;
        }

        if let Some(series) = series.filter(|series| series.name.is_some()) {
            self.upsert_episode(
                entry,
                &media,
                series,
                episode.unwrap_or_default(),
                overwrite_episode.unwrap_or(true),
            )
            .await?;
        }
        Ok(media)
    }

    async fn link_to_index(
        &self,
        save_path: &str,
        file: &FileRecord,
        attachments: &[&FileRecord],
    ) -> Result<()> {
        let Some(target) = resolve_within(&self.library.index_dir, save_path) else {
            warn!(save_path, "save path leaves the index directory, not linking");
            return Ok(());
        };
        let media = PathBuf::from(&file.path);
        let attachments: Vec<PathBuf> = attachments
            .iter()
            .map(|attachment| PathBuf::from(&attachment.path))
            .collect();
        let linked = target.clone();
        self.files
            .pool()
            .run(move || files::link_into_index(&target, &media, &attachments))
            .await??;
        debug!(target = %linked.display(), "linked into index");
        Ok(())
    }

    async fn upsert_episode(
        &self,
        entry: &FeedEntry,
        media: &Media,
        series: SeriesDescriptor,
        episode: EpisodeDescriptor,
        overwrite: bool,
    ) -> Result<()> {
        let catalog = &self.repositories.catalog;
        let Some(name) = series.name.as_deref() else {
            return Ok(());
        };
        let season = series.season.as_deref();
        let series = match catalog
            .find_series(name, season)
            .await
            .map_err(Error::database)?
        {
            Some(series) => series,
            None => catalog
                .insert_series(name, season)
                .await
                .map_err(Error::database)?,
        };

        let title = episode.title.unwrap_or_else(|| entry.title.clone());
        let existing = catalog
            .find_episode(series.id, Some(&title), episode.no.as_deref())
            .await
            .map_err(Error::database)?;
        let published = entry.published_at();
        let mut fields = EpisodeFields {
            title: Some(title),
            no: episode.no,
            description: episode.description,
            pub_at: published,
            media_id: media.id,
            series_id: series.id,
        };
        match existing {
            Some(existing) if overwrite => {
                catalog
                    .update_episode(existing.id, fields)
                    .await
                    .map_err(Error::database)?;
                debug!(episode_id = existing.id, "episode overwritten");
            }
            Some(existing) => debug!(episode_id = existing.id, "keeping existing episode"),
            None => {
                fields.pub_at = Some(published.unwrap_or_else(Utc::now));
                let inserted = catalog
                    .insert_episode(fields)
                    .await
                    .map_err(Error::database)?;
                debug!(episode_id = inserted.id, "episode created");
            }
        }
        Ok(())
    }
}
