//! Core application functionality.

use crate::cache::CacheService;
use crate::config::{ApplicationConfig, MapperKind, IN_MEMORY_DATABASE};
use crate::dao::{
    DaoError, EmployeeDaoPtr, MappedEmployeeDao, SharedConnection, SqliteEmployeeDao,
};
use crate::mapper::{MapperDefinition, MapperError, SqlSession, DEFAULT_MAPPER_DEFINITION};
use derive_more::{Constructor, Display};
use employee_cache_migrate::config::MigrationConfig;
use employee_cache_migrate::migration::{
    EmbeddedMigrationSource, FileMigrationSource, MigrationSourcePtr,
};
use employee_cache_migrate::placeholder::{
    ConfigPlaceholderProvider, PlaceholderProviderPtr, RemoteConfigPlaceholderProvider,
    StaticPlaceholderProvider,
};
use employee_cache_migrate::runner::{
    MigrationError, MigrationRunner, SchemaMigrator, SqliteMigrationRunnerExecutor,
};
use employee_cache_migrate::ErrorPtr;
use rusqlite::Connection;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

/// Migrations shipped with the application.
pub static EMBEDDED_MIGRATIONS: EmbeddedMigrationSource = EmbeddedMigrationSource::new(&[
    (
        "V1__create_employee",
        include_str!("../migrations/V1__create_employee.sql"),
    ),
    (
        "V2__deployment",
        include_str!("../migrations/V2__deployment.sql"),
    ),
    (
        "V3__seed_employee",
        include_str!("../migrations/V3__seed_employee.sql"),
    ),
]);

#[derive(Error, Debug)]
pub enum ApplicationError {
    #[error("Error loading configuration: {0}")]
    Config(ErrorPtr),
    #[error("Error opening database {path}: {error}")]
    Connection {
        path: String,
        error: rusqlite::Error,
    },
    #[error("Error loading mapper definition: {0}")]
    Mapper(#[from] MapperError),
    #[error("Schema migration failed: {0}")]
    Migration(#[from] MigrationError),
    #[error("Employee cache warm-up failed: {0}")]
    CacheWarmup(DaoError),
    #[error("Application cannot be started in state {0}")]
    AlreadyStarted(ApplicationState),
}

/// Startup lifecycle. States are only ever entered in declaration order, with [Failed] reachable
/// from any non-terminal state.
///
/// [Failed]: ApplicationState::Failed
#[derive(Clone, Copy, Debug, Display, PartialEq, Eq)]
pub enum ApplicationState {
    Unstarted,
    Migrating,
    AccessorReady,
    CacheWarming,
    Ready,
    Failed,
}

impl ApplicationState {
    pub fn is_terminal(self) -> bool {
        matches!(self, ApplicationState::Ready | ApplicationState::Failed)
    }

    fn can_transition_to(self, next: ApplicationState) -> bool {
        use ApplicationState::*;

        match next {
            Failed => !self.is_terminal(),
            _ => matches!(
                (self, next),
                (Unstarted, Migrating)
                    | (Migrating, AccessorReady)
                    | (AccessorReady, CacheWarming)
                    | (CacheWarming, Ready)
            ),
        }
    }
}

/// Components of a started application.
#[derive(Clone, Constructor)]
pub struct ApplicationContext {
    employee_dao: EmployeeDaoPtr,
    cache_service: Arc<CacheService>,
}

impl ApplicationContext {
    pub fn employee_dao(&self) -> &EmployeeDaoPtr {
        &self.employee_dao
    }

    pub fn cache_service(&self) -> &Arc<CacheService> {
        &self.cache_service
    }
}

/// Main entrypoint for the application. Runs the schema migrator, and only after it succeeds,
/// constructs the data accessor and warms the [CacheService].
pub struct Application<M: SchemaMigrator> {
    migrator: M,
    cached_employee_id: i64,
    state: ApplicationState,
}

impl<M: SchemaMigrator> Application<M> {
    pub fn new(migrator: M, cached_employee_id: i64) -> Self {
        Self {
            migrator,
            cached_employee_id,
            state: ApplicationState::Unstarted,
        }
    }

    pub fn state(&self) -> ApplicationState {
        self.state
    }

    /// Starts the application. The accessor factory is called once migrations are done. An
    /// application can be started only once, regardless of the outcome.
    pub async fn start<F>(
        &mut self,
        accessor_factory: F,
    ) -> Result<ApplicationContext, ApplicationError>
    where
        F: FnOnce() -> Result<EmployeeDaoPtr, ApplicationError>,
    {
        if self.state != ApplicationState::Unstarted {
            return Err(ApplicationError::AlreadyStarted(self.state));
        }

        let result = self.run_startup(accessor_factory).await;
        if result.is_err() {
            self.transition(ApplicationState::Failed);
        }

        result
    }

    async fn run_startup<F>(
        &mut self,
        accessor_factory: F,
    ) -> Result<ApplicationContext, ApplicationError>
    where
        F: FnOnce() -> Result<EmployeeDaoPtr, ApplicationError>,
    {
        self.transition(ApplicationState::Migrating);
        info!("Running schema migrations...");
        self.migrator.migrate().await?;

        let employee_dao = accessor_factory()?;
        self.transition(ApplicationState::AccessorReady);

        self.transition(ApplicationState::CacheWarming);
        let cache_service = CacheService::warm(employee_dao.as_ref(), self.cached_employee_id)
            .await
            .map_err(ApplicationError::CacheWarmup)?;

        self.transition(ApplicationState::Ready);
        info!("Application ready.");

        Ok(ApplicationContext::new(employee_dao, Arc::new(cache_service)))
    }

    fn transition(&mut self, next: ApplicationState) {
        debug_assert!(
            self.state.can_transition_to(next),
            "illegal transition from {} to {}",
            self.state,
            next
        );

        debug!("Application state: {} -> {}", self.state, next);
        self.state = next;
    }
}

/// Builds all components in dependency order and starts the application.
pub async fn bootstrap(
    config: &ApplicationConfig,
    migration_config: MigrationConfig,
    migration_sources: Vec<MigrationSourcePtr>,
    placeholder_providers: Vec<PlaceholderProviderPtr>,
) -> Result<ApplicationContext, ApplicationError> {
    let connection = open_connection(&config.database_path)?;

    let migrator = MigrationRunner::new(
        migration_config,
        migration_sources,
        placeholder_providers,
        vec![Arc::new(SqliteMigrationRunnerExecutor::new(connection.clone()))],
    );

    let mut application = Application::new(migrator, config.cached_employee_id);
    application
        .start(|| create_employee_dao(config, connection))
        .await
}

/// Embedded migrations, followed by files from configured locations.
pub fn default_migration_sources(migration_config: &MigrationConfig) -> Vec<MigrationSourcePtr> {
    let mut sources: Vec<MigrationSourcePtr> = vec![Arc::new(EMBEDDED_MIGRATIONS.clone())];
    sources.extend(
        migration_config
            .locations
            .iter()
            .map(|location| Arc::new(FileMigrationSource::new(location)) as MigrationSourcePtr),
    );

    sources
}

/// Placeholder providers in precedence order: the remote config stand-in, values registered in
/// code (`client = local`), and finally values from the config file or environment.
pub fn default_placeholder_providers(
    migration_config: &MigrationConfig,
) -> Vec<PlaceholderProviderPtr> {
    vec![
        Arc::new(RemoteConfigPlaceholderProvider::new("remote config manager")),
        Arc::new(StaticPlaceholderProvider::new([("client", "local")])),
        Arc::new(ConfigPlaceholderProvider::new(migration_config)),
    ]
}

/// Installs a default `tracing` subscriber writing to stderr, filtered by `RUST_LOG` (`info` when
/// unset).
pub fn install_tracing_logger() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    if let Err(error) = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init()
    {
        debug!("Not installing tracing logger: {}", error);
    }
}

fn open_connection(path: &str) -> Result<SharedConnection, ApplicationError> {
    debug!("Opening database {}...", path);

    let connection = if path == IN_MEMORY_DATABASE {
        Connection::open_in_memory()
    } else {
        Connection::open(path)
    };

    connection
        .map(|connection| Arc::new(Mutex::new(connection)))
        .map_err(|error| ApplicationError::Connection {
            path: path.to_string(),
            error,
        })
}

fn create_employee_dao(
    config: &ApplicationConfig,
    connection: SharedConnection,
) -> Result<EmployeeDaoPtr, ApplicationError> {
    match config.mapper {
        MapperKind::Inline => Ok(Arc::new(SqliteEmployeeDao::new(connection))),
        MapperKind::Statement => {
            let definition = match &config.mapper_definition {
                Some(path) => MapperDefinition::from_file(path)?,
                None => MapperDefinition::from_json(DEFAULT_MAPPER_DEFINITION)?,
            };

            Ok(Arc::new(MappedEmployeeDao::new(SqlSession::new(
                connection,
                &definition,
            )?)))
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::application::{
        default_migration_sources, Application, ApplicationError, ApplicationState,
    };
    use crate::dao::{DaoError, EmployeeDao, EmployeeDaoPtr};
    use crate::employee::Employee;
    use employee_cache_migrate::config::MigrationConfig;
    use employee_cache_migrate::migration::MigrationSource;
    use employee_cache_migrate::runner::{MigrationError, SchemaMigrator};
    use employee_cache_migrate::ErrorPtr;
    use futures::future::{BoxFuture, FutureExt};
    use mockall::mock;
    use std::io;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    mock! {
        Migrator {}

        impl SchemaMigrator for Migrator {
            fn migrate(&self) -> BoxFuture<'_, Result<(), MigrationError>>;
        }
    }

    #[derive(Default)]
    struct Store {
        migrated: AtomicBool,
        queries: AtomicUsize,
        rejected_queries: AtomicUsize,
        events: Mutex<Vec<&'static str>>,
        employees: Vec<Employee>,
    }

    struct StoreMigrator(Arc<Store>);

    impl SchemaMigrator for StoreMigrator {
        fn migrate(&self) -> BoxFuture<'_, Result<(), MigrationError>> {
            async {
                self.0.events.lock().unwrap().push("migrate");
                self.0.migrated.store(true, Ordering::SeqCst);
                Ok(())
            }
            .boxed()
        }
    }

    // rejects queries until migrated
    struct StoreDao(Arc<Store>);

    impl EmployeeDao for StoreDao {
        fn get_employee(&self, id: i64) -> BoxFuture<'_, Result<Employee, DaoError>> {
            async move {
                if !self.0.migrated.load(Ordering::SeqCst) {
                    self.0.rejected_queries.fetch_add(1, Ordering::SeqCst);
                    return Err(DaoError::Query(rusqlite::Error::InvalidQuery));
                }

                self.0.queries.fetch_add(1, Ordering::SeqCst);
                self.0.events.lock().unwrap().push("query");

                self.0
                    .employees
                    .iter()
                    .find(|employee| employee.id == id)
                    .cloned()
                    .ok_or_else(|| DaoError::NotFound(format!("employee with id {id}")))
            }
            .boxed()
        }
    }

    fn store(employees: Vec<Employee>) -> Arc<Store> {
        Arc::new(Store {
            employees,
            ..Default::default()
        })
    }

    fn dao_factory(
        store: &Arc<Store>,
    ) -> impl FnOnce() -> Result<EmployeeDaoPtr, ApplicationError> {
        let store = store.clone();
        move || {
            store.events.lock().unwrap().push("construct");
            Ok(Arc::new(StoreDao(store)) as EmployeeDaoPtr)
        }
    }

    #[tokio::test]
    async fn should_migrate_before_querying() {
        let store = store(vec![Employee::new(1, "Alice".to_string())]);
        let mut application = Application::new(StoreMigrator(store.clone()), 1);

        let context = application.start(dao_factory(&store)).await.unwrap();

        assert_eq!(application.state(), ApplicationState::Ready);
        assert_eq!(
            *store.events.lock().unwrap(),
            vec!["migrate", "construct", "query"]
        );
        assert_eq!(store.rejected_queries.load(Ordering::SeqCst), 0);
        assert_eq!(
            context.cache_service().employee(),
            &Employee::new(1, "Alice".to_string())
        );
    }

    #[tokio::test]
    async fn should_query_exactly_once() {
        let store = store(vec![Employee::new(1, "Alice".to_string())]);
        let mut application = Application::new(StoreMigrator(store.clone()), 1);

        let context = application.start(dao_factory(&store)).await.unwrap();
        let first = context.cache_service().employee().clone();
        for _ in 0..10 {
            assert_eq!(context.cache_service().employee(), &first);
        }

        assert_eq!(store.queries.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn should_fail_on_migration_error() {
        let mut migrator = MockMigrator::new();
        migrator.expect_migrate().times(1).returning(|| {
            async {
                Err(MigrationError::Executor(
                    Arc::new(io::Error::new(io::ErrorKind::Other, "disk full")) as ErrorPtr,
                ))
            }
            .boxed()
        });

        let factory_called = AtomicBool::new(false);
        let mut application = Application::new(migrator, 1);

        let error = application
            .start(|| {
                factory_called.store(true, Ordering::SeqCst);
                Err(ApplicationError::AlreadyStarted(ApplicationState::Unstarted))
            })
            .await
            .err()
            .unwrap();

        assert!(matches!(error, ApplicationError::Migration(_)));
        assert!(!factory_called.load(Ordering::SeqCst));
        assert_eq!(application.state(), ApplicationState::Failed);
    }

    #[tokio::test]
    async fn should_fail_on_missing_employee() {
        let store = store(vec![]);
        let mut application = Application::new(StoreMigrator(store.clone()), 1);

        let error = application.start(dao_factory(&store)).await.err().unwrap();

        assert!(matches!(
            error,
            ApplicationError::CacheWarmup(DaoError::NotFound(_))
        ));
        assert_eq!(application.state(), ApplicationState::Failed);
    }

    #[tokio::test]
    async fn should_not_start_twice() {
        let store = store(vec![Employee::new(1, "Alice".to_string())]);
        let mut application = Application::new(StoreMigrator(store.clone()), 1);

        application.start(dao_factory(&store)).await.unwrap();
        let error = application.start(dao_factory(&store)).await.err().unwrap();

        assert!(matches!(
            error,
            ApplicationError::AlreadyStarted(ApplicationState::Ready)
        ));
        assert_eq!(store.queries.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn should_only_allow_ordered_transitions() {
        use ApplicationState::*;

        assert!(Unstarted.can_transition_to(Migrating));
        assert!(!Unstarted.can_transition_to(AccessorReady));
        assert!(!Migrating.can_transition_to(CacheWarming));
        assert!(CacheWarming.can_transition_to(Ready));
        assert!(Migrating.can_transition_to(Failed));
        assert!(!Ready.can_transition_to(Failed));
        assert!(!Failed.can_transition_to(Migrating));
    }

    #[test]
    fn should_add_file_sources_for_locations() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("V4__add_carol.sql"),
            "INSERT INTO employee (id, name) VALUES (3, 'Carol');",
        )
        .unwrap();

        let mut migration_config = MigrationConfig::default();
        migration_config
            .locations
            .push(dir.path().to_string_lossy().into_owned());

        let sources = default_migration_sources(&migration_config);
        assert_eq!(sources.len(), 2);

        let scripts = sources[1].scripts().unwrap();
        assert_eq!(scripts.len(), 1);
        assert_eq!(scripts[0].name, "V4__add_carol");
    }
}
