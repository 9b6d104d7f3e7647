//! Single-entry employee cache, warmed once on startup.

use crate::dao::{DaoError, EmployeeDao};
use crate::employee::Employee;
use tracing::{debug, info};

/// Holds the employee fetched during warm-up. A `CacheService` only exists once warm-up has
/// succeeded; it is never refreshed afterwards.
#[derive(Clone, Debug)]
pub struct CacheService {
    employee: Employee,
}

impl CacheService {
    /// Fetches the employee with the given id, issuing exactly one query.
    pub async fn warm(dao: &(dyn EmployeeDao + Send + Sync), id: i64) -> Result<Self, DaoError> {
        debug!("Warming employee cache with id {}...", id);

        let employee = dao.get_employee(id).await?;

        info!("Cached {}.", employee);
        Ok(Self { employee })
    }

    pub fn employee(&self) -> &Employee {
        &self.employee
    }
}

#[cfg(test)]
mod tests {
    use crate::cache::CacheService;
    use crate::dao::{DaoError, MockEmployeeDao};
    use crate::employee::Employee;
    use futures::future::FutureExt;
    use mockall::predicate::*;

    #[tokio::test]
    async fn should_query_once() {
        let mut dao = MockEmployeeDao::new();
        dao.expect_get_employee()
            .with(eq(1))
            .times(1)
            .returning(|id| async move { Ok(Employee::new(id, "Alice".to_string())) }.boxed());

        let cache = CacheService::warm(&dao, 1).await.unwrap();

        let first = cache.employee().clone();
        for _ in 0..3 {
            assert_eq!(cache.employee(), &first);
        }
        assert_eq!(first, Employee::new(1, "Alice".to_string()));
    }

    #[tokio::test]
    async fn should_fail_warm_up() {
        let mut dao = MockEmployeeDao::new();
        dao.expect_get_employee()
            .times(1)
            .returning(|id| {
                async move { Err(DaoError::NotFound(format!("employee with id {id}"))) }.boxed()
            });

        assert!(matches!(
            CacheService::warm(&dao, 1).await.unwrap_err(),
            DaoError::NotFound(_)
        ));
    }
}
