use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use jimeng_contracts::chat::{parse_command, Command, CLEAN_ALL_COMMAND, EXAMPLE_PROMPT};
use jimeng_contracts::config::PluginConfig;
use jimeng_contracts::activity::{ActivityKind, ActivityLog};
use jimeng_contracts::host::{ContextType, EventContext, Plugin, PluginMeta, Reply};
use serde_json::json;

use crate::client::{ImageProvider, JimengClient};
use crate::error_chain_text;
use crate::retention::{RetentionSweeper, RetentionTimer, SweepReport};
use crate::storage::ImageStore;

pub const PLUGIN_META: PluginMeta = PluginMeta {
    name: "Jimeng",
    desire_priority: 90,
    hidden: false,
    desc: "A plugin for generating images using Jimeng AI.",
    version: "1.0.0",
    author: "Coda",
};

const REPLY_ERROR_MAX_CHARS: usize = 512;

pub struct JimengPlugin {
    config: PluginConfig,
    provider: Box<dyn ImageProvider>,
    store: ImageStore,
    sweeper: RetentionSweeper,
    activity: Option<ActivityLog>,
    _timer: RetentionTimer,
}

impl JimengPlugin {
    /// Starts the plugin against the configured HTTP endpoint.
    pub fn new(config: PluginConfig, activity_path: Option<&Path>) -> Result<Self> {
        let client = JimengClient::new(&config.api_url, &config.auth_token, config.max_images)?;
        let activity =
            activity_path.map(|path| ActivityLog::new(path, uuid::Uuid::new_v4().to_string()));
        Self::with_provider(config, Box::new(client), activity)
    }

    pub fn with_provider(
        config: PluginConfig,
        provider: Box<dyn ImageProvider>,
        activity: Option<ActivityLog>,
    ) -> Result<Self> {
        Self::start(config, provider, activity).inspect_err(|err| {
            tracing::error!(target: "jimeng", "plugin initialization failed: {err:#}");
        })
    }

    fn start(
        config: PluginConfig,
        provider: Box<dyn ImageProvider>,
        activity: Option<ActivityLog>,
    ) -> Result<Self> {
        let store = ImageStore::open(&config.image_output_dir)?;
        let mut sweeper = RetentionSweeper::new(store.dir(), config.retention_window());
        if let Some(activity) = &activity {
            sweeper = sweeper.with_activity(activity.clone());
        }
        let timer = RetentionTimer::start(sweeper.clone(), config.check_interval())
            .context("failed to schedule image cleanup")?;

        tracing::info!(
            target: "jimeng",
            provider = provider.name(),
            clean_interval_days = config.clean_interval,
            clean_check_interval_secs = config.clean_check_interval,
            max_images = config.max_images,
            "plugin initialized"
        );

        Ok(Self {
            config,
            provider,
            store,
            sweeper,
            activity,
            _timer: timer,
        })
    }

    pub fn config(&self) -> &PluginConfig {
        &self.config
    }

    pub fn store(&self) -> &ImageStore {
        &self.store
    }

    pub fn handle_command(&self, command: Command) -> Result<Reply> {
        match command {
            Command::Generate { prompt } => self.generate_reply(&prompt),
            Command::CleanAll => Ok(self.clean_all_reply()),
            Command::Help => Ok(Reply::Text(self.help_text(false))),
        }
    }

    /// Runs one retention sweep immediately.
    pub fn clean_old_images(&self) -> SweepReport {
        self.sweeper.clean_old_images()
    }

    fn generate_reply(&self, prompt: &str) -> Result<Reply> {
        let urls = self.provider.generate_image(prompt)?;
        tracing::debug!(target: "jimeng", ?urls, "generated image urls");

        if urls.is_empty() {
            tracing::error!(target: "jimeng", "image generation returned no images");
            self.record(
                ActivityKind::GenerationFailed,
                json!({"prompt": prompt, "error": "no images returned"}),
            );
            return Ok(Reply::Error("生成图片失败。".to_string()));
        }

        let mut replies = Vec::with_capacity(urls.len());
        let mut paths: Vec<PathBuf> = Vec::with_capacity(urls.len());
        for (idx, url) in urls.iter().enumerate() {
            let bytes = self
                .provider
                .download_image(url)
                .inspect_err(|err| {
                    tracing::error!(target: "jimeng", url = %url, "failed to download or save image: {err:#}");
                })?;
            let path = self.store.save(&bytes, idx)?;
            tracing::debug!(target: "jimeng", path = %path.display(), "image saved");
            replies.push(Reply::Image(self.store.read(&path)?));
            paths.push(path);
        }

        self.record(
            ActivityKind::ImageGenerated,
            json!({
                "prompt": prompt,
                "count": paths.len(),
                "paths": paths
                    .iter()
                    .map(|path| path.to_string_lossy().to_string())
                    .collect::<Vec<String>>(),
            }),
        );

        if replies.len() == 1 {
            return Ok(replies.remove(0));
        }
        Ok(Reply::Batch {
            text: format!("已生成 {} 张图片：", replies.len()),
            replies,
        })
    }

    fn clean_all_reply(&self) -> Reply {
        match self.store.clean_all_images() {
            Ok(count) => {
                tracing::info!(target: "jimeng", count, "cleaned all images");
                self.record(ActivityKind::ImagesCleaned, json!({"count": count}));
                Reply::Text("已清理所有图片。".to_string())
            }
            Err(err) => {
                tracing::error!(target: "jimeng", "failed to clean images: {err:#}");
                Reply::Error(format!(
                    "清理图片失败: {}",
                    error_chain_text(&err, REPLY_ERROR_MAX_CHARS)
                ))
            }
        }
    }

    fn record(&self, kind: ActivityKind, details: serde_json::Value) {
        let Some(activity) = &self.activity else {
            return;
        };
        if let Err(err) = activity.record(kind, details) {
            tracing::warn!(target: "jimeng", "failed to record {}: {err:#}", kind.as_str());
        }
    }
}

impl Plugin for JimengPlugin {
    fn meta(&self) -> &PluginMeta {
        &PLUGIN_META
    }

    fn on_handle_context(&self, event: &mut EventContext) {
        if event.context.kind != ContextType::Text {
            return;
        }
        let Some(command) = parse_command(&event.context.content, &self.config.drawing_prefixes)
        else {
            return;
        };
        tracing::debug!(target: "jimeng", content = %event.context.content, "received message");

        let reply = match self.handle_command(command) {
            Ok(reply) => reply,
            Err(err) => {
                tracing::error!(target: "jimeng", "request failed: {err:#}");
                let message = error_chain_text(&err, REPLY_ERROR_MAX_CHARS);
                self.record(ActivityKind::GenerationFailed, json!({"error": message}));
                Reply::Error(format!("发生错误: {message}"))
            }
        };
        event.respond(reply);
    }

    fn help_text(&self, verbose: bool) -> String {
        help_text(&self.config, verbose)
    }
}

/// Usage text for `config`. Needs no running plugin.
pub fn help_text(config: &PluginConfig, verbose: bool) -> String {
    let prefixes = config.drawing_prefixes.join(" 或 ");
    let example_prefix = config
        .drawing_prefixes
        .first()
        .map(String::as_str)
        .unwrap_or_default();
    let mut text = String::from("即梦AI绘图插件使用说明：\n");
    text.push_str(&format!("1. 使用前缀触发：{prefixes}\n"));
    text.push_str("2. 直接输入描述文本即可生成图片\n");
    text.push_str(&format!("3. 输入 {CLEAN_ALL_COMMAND} 可以清理所有生成的图片\n"));
    text.push_str("4. 可在配置文件中设置 max_images 控制输出图片数量\n");
    if verbose {
        text.push_str(&format!(
            "当前设置：最多 {} 张图片，图片保留 {} 天，每 {} 秒检查一次\n",
            config.max_images, config.clean_interval, config.clean_check_interval
        ));
    }
    text.push_str("示例：\n");
    text.push_str(&format!("{example_prefix} {EXAMPLE_PROMPT}\n"));
    text
}
