use rusqlite::{OptionalExtension, Row, params};
use uuid::Uuid;

use super::{
    SqliteStore, constraint_error, datetime_at, format_datetime, opt_datetime_at, opt_id,
    opt_uuid_at, parsed_at, uuid_at,
};
use crate::error::{Error, Result};
use crate::store::JobStore;
use crate::types::Job;

const JOB_COLUMNS: &str = "id, serial, job_type, status, result, error, repository_id, user_id, \
     queued_at, started_at, finished_at";

fn row_to_job(row: &Row<'_>) -> rusqlite::Result<Job> {
    Ok(Job {
        id: uuid_at(row, 0)?,
        serial: row.get(1)?,
        job_type: row.get(2)?,
        status: parsed_at(row, 3)?,
        result: parsed_at(row, 4)?,
        error: row.get(5)?,
        repository_id: opt_uuid_at(row, 6)?,
        user_id: uuid_at(row, 7)?,
        queued_at: datetime_at(row, 8)?,
        started_at: opt_datetime_at(row, 9)?,
        finished_at: opt_datetime_at(row, 10)?,
    })
}

impl JobStore for SqliteStore {
    fn create_job(&self, job: &Job) -> Result<i64> {
        let conn = self.conn();
        conn.execute(
            "INSERT INTO soma_jobs (id, job_type, status, result, error, repository_id, user_id,
             queued_at, started_at, finished_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            params![
                job.id.to_string(),
                job.job_type,
                job.status.as_str(),
                job.result.as_str(),
                job.error,
                opt_id(job.repository_id),
                job.user_id.to_string(),
                format_datetime(&job.queued_at),
                job.started_at.as_ref().map(format_datetime),
                job.finished_at.as_ref().map(format_datetime),
            ],
        )
        .map_err(|e| constraint_error(e, "job"))?;
        Ok(conn.last_insert_rowid())
    }

    fn update_job(&self, job: &Job) -> Result<()> {
        self.conn().execute(
            "UPDATE soma_jobs SET status = ?2, result = ?3, error = ?4, started_at = ?5,
             finished_at = ?6
             WHERE id = ?1",
            params![
                job.id.to_string(),
                job.status.as_str(),
                job.result.as_str(),
                job.error,
                job.started_at.as_ref().map(format_datetime),
                job.finished_at.as_ref().map(format_datetime),
            ],
        )?;
        Ok(())
    }

    fn get_job(&self, id: Uuid) -> Result<Option<Job>> {
        self.conn()
            .query_row(
                &format!("SELECT {JOB_COLUMNS} FROM soma_jobs WHERE id = ?1"),
                params![id.to_string()],
                row_to_job,
            )
            .optional()
            .map_err(Error::from)
    }

    fn list_jobs(&self, user_id: Option<Uuid>) -> Result<Vec<Job>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(&format!(
            "SELECT {JOB_COLUMNS} FROM soma_jobs WHERE (?1 IS NULL OR user_id = ?1)
             ORDER BY serial DESC"
        ))?;
        let rows = stmt.query_map(params![opt_id(user_id)], row_to_job)?;
        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(Error::from)
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::*;
    use crate::store::sqlite::tests::create_test_store;
    use crate::types::{JobResult, JobStatus};

    fn job(user_id: Uuid) -> Job {
        Job {
            id: Uuid::new_v4(),
            serial: 0,
            job_type: "create_bucket".into(),
            status: JobStatus::Queued,
            result: JobResult::Pending,
            error: None,
            repository_id: Some(Uuid::new_v4()),
            user_id,
            queued_at: Utc::now(),
            started_at: None,
            finished_at: None,
        }
    }

    #[test]
    fn test_serials_increase() {
        let (_temp, store) = create_test_store();
        let user = Uuid::new_v4();

        let first = store.create_job(&job(user)).unwrap();
        let second = store.create_job(&job(user)).unwrap();
        assert!(second > first);
    }

    #[test]
    fn test_job_lifecycle() {
        let (_temp, store) = create_test_store();
        let user = Uuid::new_v4();
        let mut queued = job(user);
        store.create_job(&queued).unwrap();

        queued.status = JobStatus::Processed;
        queued.result = JobResult::Failed;
        queued.error = Some("duplicate bucket name".into());
        queued.started_at = Some(Utc::now());
        queued.finished_at = Some(Utc::now());
        store.update_job(&queued).unwrap();

        let fetched = store.get_job(queued.id).unwrap().unwrap();
        assert_eq!(fetched.status, JobStatus::Processed);
        assert_eq!(fetched.result, JobResult::Failed);
        assert_eq!(fetched.error.as_deref(), Some("duplicate bucket name"));

        assert_eq!(store.list_jobs(Some(user)).unwrap().len(), 1);
        assert!(store.list_jobs(Some(Uuid::new_v4())).unwrap().is_empty());
        assert_eq!(store.list_jobs(None).unwrap().len(), 1);
    }
}
