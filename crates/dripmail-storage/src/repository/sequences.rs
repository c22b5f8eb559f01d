//! Sequence repository

use crate::db::{db_err, DatabasePool};
use crate::models::{CreateSequence, NewStep, Sequence, SequenceChange, SequenceWithSteps, Step};
use async_trait::async_trait;
use dripmail_common::types::{FieldViolation, SequenceId};
use dripmail_common::{Error, Result};
use sqlx::{PgConnection, Postgres, Transaction};
use uuid::Uuid;

/// Sequence repository trait
#[async_trait]
pub trait SequenceRepository: Send + Sync {
    async fn create(&self, input: CreateSequence) -> Result<SequenceWithSteps>;
    async fn get(&self, id: SequenceId) -> Result<Option<SequenceWithSteps>>;
    async fn list(&self) -> Result<Vec<Sequence>>;
    /// Replace name and steps; refused while any campaign references the sequence
    async fn replace(
        &self,
        id: SequenceId,
        input: CreateSequence,
    ) -> Result<SequenceChange<SequenceWithSteps>>;
    /// Delete; refused while any campaign references the sequence
    async fn delete(&self, id: SequenceId) -> Result<SequenceChange<()>>;
    async fn get_step(&self, sequence_id: SequenceId, step_number: i32) -> Result<Option<Step>>;
}

/// Turn validation problems into a single error
pub(crate) fn validation_error(violations: &[FieldViolation]) -> Error {
    let joined = violations
        .iter()
        .map(|v| format!("{}: {}", v.field, v.message))
        .collect::<Vec<_>>()
        .join("; ");
    Error::Validation(joined)
}

/// Build step rows from input, ordered by step number
pub(crate) fn build_steps(sequence_id: SequenceId, input: &[NewStep]) -> Vec<Step> {
    let mut steps: Vec<Step> = input
        .iter()
        .map(|s| Step {
            id: Uuid::now_v7(),
            sequence_id,
            step_number: s.step_number,
            subject_template: s.subject_template.clone(),
            body_template: s.body_template.clone(),
            delay_days: s.delay_days,
        })
        .collect();
    steps.sort_by_key(|s| s.step_number);
    steps
}

/// Database sequence repository
pub struct DbSequenceRepository {
    pool: DatabasePool,
}

impl DbSequenceRepository {
    pub fn new(pool: DatabasePool) -> Self {
        Self { pool }
    }

    async fn insert_steps(conn: &mut PgConnection, steps: &[Step]) -> Result<()> {
        for step in steps {
            sqlx::query(
                r#"
                INSERT INTO sequence_steps (
                    id, sequence_id, step_number, subject_template, body_template, delay_days
                )
                VALUES ($1, $2, $3, $4, $5, $6)
                "#,
            )
            .bind(step.id)
            .bind(step.sequence_id)
            .bind(step.step_number)
            .bind(&step.subject_template)
            .bind(&step.body_template)
            .bind(step.delay_days)
            .execute(&mut *conn)
            .await
            .map_err(db_err)?;
        }
        Ok(())
    }

    /// Lock the sequence row and report whether a campaign references it
    async fn lock_unused(
        tx: &mut Transaction<'_, Postgres>,
        id: SequenceId,
    ) -> Result<Option<bool>> {
        let found: Option<(Uuid,)> =
            sqlx::query_as("SELECT id FROM sequences WHERE id = $1 FOR UPDATE")
                .bind(id)
                .fetch_optional(&mut **tx)
                .await
                .map_err(db_err)?;

        if found.is_none() {
            return Ok(None);
        }

        let (in_use,): (bool,) =
            sqlx::query_as("SELECT EXISTS (SELECT 1 FROM campaigns WHERE sequence_id = $1)")
                .bind(id)
                .fetch_one(&mut **tx)
                .await
                .map_err(db_err)?;

        Ok(Some(!in_use))
    }
}

#[async_trait]
impl SequenceRepository for DbSequenceRepository {
    async fn create(&self, input: CreateSequence) -> Result<SequenceWithSteps> {
        let violations = input.validate();
        if !violations.is_empty() {
            return Err(validation_error(&violations));
        }

        let mut tx = self.pool.pool().begin().await.map_err(db_err)?;

        let sequence = sqlx::query_as::<_, Sequence>(
            "INSERT INTO sequences (id, name) VALUES ($1, $2) RETURNING *",
        )
        .bind(Uuid::now_v7())
        .bind(input.name.trim())
        .fetch_one(&mut *tx)
        .await
        .map_err(db_err)?;

        let steps = build_steps(sequence.id, &input.steps);
        Self::insert_steps(&mut tx, &steps).await?;

        tx.commit().await.map_err(db_err)?;

        Ok(SequenceWithSteps { sequence, steps })
    }

    async fn get(&self, id: SequenceId) -> Result<Option<SequenceWithSteps>> {
        let sequence = sqlx::query_as::<_, Sequence>("SELECT * FROM sequences WHERE id = $1")
            .bind(id)
            .fetch_optional(self.pool.pool())
            .await
            .map_err(db_err)?;

        let Some(sequence) = sequence else {
            return Ok(None);
        };

        let steps = sqlx::query_as::<_, Step>(
            "SELECT * FROM sequence_steps WHERE sequence_id = $1 ORDER BY step_number ASC",
        )
        .bind(id)
        .fetch_all(self.pool.pool())
        .await
        .map_err(db_err)?;

        Ok(Some(SequenceWithSteps { sequence, steps }))
    }

    async fn list(&self) -> Result<Vec<Sequence>> {
        sqlx::query_as::<_, Sequence>("SELECT * FROM sequences ORDER BY created_at DESC")
            .fetch_all(self.pool.pool())
            .await
            .map_err(db_err)
    }

    async fn replace(
        &self,
        id: SequenceId,
        input: CreateSequence,
    ) -> Result<SequenceChange<SequenceWithSteps>> {
        let violations = input.validate();
        if !violations.is_empty() {
            return Err(validation_error(&violations));
        }

        let mut tx = self.pool.pool().begin().await.map_err(db_err)?;

        match Self::lock_unused(&mut tx, id).await? {
            None => return Ok(SequenceChange::NotFound),
            Some(false) => return Ok(SequenceChange::InUse),
            Some(true) => {}
        }

        let sequence = sqlx::query_as::<_, Sequence>(
            "UPDATE sequences SET name = $2, updated_at = NOW() WHERE id = $1 RETURNING *",
        )
        .bind(id)
        .bind(input.name.trim())
        .fetch_one(&mut *tx)
        .await
        .map_err(db_err)?;

        sqlx::query("DELETE FROM sequence_steps WHERE sequence_id = $1")
            .bind(id)
            .execute(&mut *tx)
            .await
            .map_err(db_err)?;

        let steps = build_steps(id, &input.steps);
        Self::insert_steps(&mut tx, &steps).await?;

        tx.commit().await.map_err(db_err)?;

        Ok(SequenceChange::Applied(SequenceWithSteps { sequence, steps }))
    }

    async fn delete(&self, id: SequenceId) -> Result<SequenceChange<()>> {
        let mut tx = self.pool.pool().begin().await.map_err(db_err)?;

        match Self::lock_unused(&mut tx, id).await? {
            None => return Ok(SequenceChange::NotFound),
            Some(false) => return Ok(SequenceChange::InUse),
            Some(true) => {}
        }

        sqlx::query("DELETE FROM sequences WHERE id = $1")
            .bind(id)
            .execute(&mut *tx)
            .await
            .map_err(db_err)?;

        tx.commit().await.map_err(db_err)?;

        Ok(SequenceChange::Applied(()))
    }

    async fn get_step(&self, sequence_id: SequenceId, step_number: i32) -> Result<Option<Step>> {
        sqlx::query_as::<_, Step>(
            "SELECT * FROM sequence_steps WHERE sequence_id = $1 AND step_number = $2",
        )
        .bind(sequence_id)
        .bind(step_number)
        .fetch_optional(self.pool.pool())
        .await
        .map_err(db_err)
    }
}
