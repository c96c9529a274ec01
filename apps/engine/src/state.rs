use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::info;

use crate::actuator::retry::RetryPolicy;
use crate::actuator::ActuatorConfig;
use crate::archive::s3::build_s3_client;
use crate::archive::{Archiver, FsArchiver, S3Archiver};
use crate::browser::{SessionFactory, WebDriverFactory};
use crate::cache::{FileLocatorCache, LocatorCache, RedisLocatorCache};
use crate::config::Config;
use crate::db::create_pool;
use crate::engine::ApplicationEngine;
use crate::models::UserProfile;
use crate::oracle::{anthropic, FieldOracle, LlmOracle, MessagesApi};
use crate::questions::{CustomQuestionHandler, QuestionPolicy};
use crate::resolver::{FieldResolver, ResolverConfig};
use crate::store::{JobStore, PgJobStore};
use crate::strategy::flow::FormKit;
use crate::strategy::vision::{HttpVisionAgent, VisionAgent};
use crate::strategy::{
    HybridAiStrategy, StrategyDescriptor, StrategyRegistry, TraditionalStrategy,
    UniversalAiStrategy, VisionAgentStrategy,
};

/// Long-lived collaborators, built once at startup and shared by every job.
#[derive(Clone)]
pub struct AppState {
    pub config: Config,
    pub store: Arc<dyn JobStore>,
    pub cache: Arc<dyn LocatorCache>,
    pub sessions: Arc<dyn SessionFactory>,
    /// Absent without ANTHROPIC_API_KEY; strategies needing it report unavailable.
    pub oracle: Option<Arc<dyn FieldOracle>>,
    pub vision: Option<Arc<dyn VisionAgent>>,
    pub archiver: Arc<dyn Archiver>,
    pub profile: Arc<UserProfile>,
}

impl AppState {
    pub async fn init(config: Config) -> Result<Self> {
        let profile = UserProfile::load(&config.profile_path)?;
        info!("Loaded profile for {}", profile.full_name());

        let db = create_pool(&config.database_url).await?;
        let store: Arc<dyn JobStore> = Arc::new(PgJobStore::new(db));

        let cache: Arc<dyn LocatorCache> = match &config.redis_url {
            Some(url) => {
                let cache = RedisLocatorCache::connect(url)
                    .await
                    .context("Failed to connect to Redis locator cache")?;
                info!("Locator cache: Redis");
                Arc::new(cache)
            }
            None => {
                info!("Locator cache: {}", config.locator_cache_path.display());
                Arc::new(FileLocatorCache::new(&config.locator_cache_path))
            }
        };

        let oracle: Option<Arc<dyn FieldOracle>> = match &config.anthropic_api_key {
            Some(key) => {
                let api = MessagesApi::new(key.clone(), config.oracle_timeout)?;
                info!("Field oracle initialized (model: {})", anthropic::MODEL);
                Some(Arc::new(LlmOracle::new(api, config.oracle_timeout)))
            }
            None => {
                info!("ANTHROPIC_API_KEY not set; AI strategies disabled");
                None
            }
        };

        let vision: Option<Arc<dyn VisionAgent>> = match &config.vision_agent_url {
            Some(url) => Some(Arc::new(HttpVisionAgent::new(
                url,
                config.vision_agent_api_key.clone(),
            )?)),
            None => None,
        };

        let sessions: Arc<dyn SessionFactory> =
            Arc::new(WebDriverFactory::new(&config.webdriver_url, config.headless)?);

        let archiver: Arc<dyn Archiver> = match &config.s3 {
            Some(settings) => {
                let client = build_s3_client(settings).await;
                info!("Archiving to s3://{}", settings.bucket);
                Arc::new(S3Archiver::new(client, settings.bucket.clone()))
            }
            None => Arc::new(FsArchiver::new(&config.processed_dir)),
        };

        Ok(Self {
            config,
            store,
            cache,
            sessions,
            oracle,
            vision,
            archiver,
            profile: Arc::new(profile),
        })
    }

    fn form_kit(&self) -> FormKit {
        let resolver = FieldResolver::new(
            self.oracle.clone(),
            self.cache.clone(),
            ResolverConfig {
                max_chunk_chars: self.config.max_chunk_chars,
                overlap_segments: self.config.chunk_overlap_segments,
            },
        );
        let questions = CustomQuestionHandler::new(
            self.oracle.clone(),
            QuestionPolicy {
                demographic_default: self.config.demographic_default.clone(),
                ..Default::default()
            },
        );
        FormKit {
            resolver: Arc::new(resolver),
            questions: Arc::new(questions),
            actuator: ActuatorConfig {
                element_wait: self.config.element_wait,
                retry: RetryPolicy::default(),
            },
            transition_wait: self.config.transition_wait,
        }
    }

    pub fn registry(&self) -> StrategyRegistry {
        let kit = self.form_kit();
        let mut registry = StrategyRegistry::new();
        registry.register(Arc::new(VisionAgentStrategy::new(self.vision.clone())));
        registry.register(Arc::new(UniversalAiStrategy::new(kit.clone())));
        registry.register(Arc::new(HybridAiStrategy::new(kit.clone())));
        registry.register(Arc::new(TraditionalStrategy::new(kit)));
        registry
    }

    pub fn engine(&self) -> ApplicationEngine {
        let chain = StrategyDescriptor::chain(
            &self.config.strategy_order,
            self.config.strategy_step_budget,
            self.config.strategy_retry_budget,
        );
        ApplicationEngine::new(
            self.store.clone(),
            self.registry(),
            chain,
            self.sessions.clone(),
            self.cache.clone(),
            self.profile.clone(),
        )
        .with_archiver(self.archiver.clone())
    }
}
