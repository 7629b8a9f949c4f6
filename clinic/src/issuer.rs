//! Identifier issuance.
//!
//! Doctors, patients and reservations get fixed-length numeric identifiers
//! (8, 10 and 12 digits, first digit non-zero). A candidate is accepted only
//! if it can be claimed in the issuer's in-process claim set, which makes
//! concurrent issuance race-free, and if no stored record already uses it.
//! A claim lasts until the owner of the identifier calls
//! [`IdIssuer::settle`] after its save; from then on the stored record
//! keeps the identifier taken.

use clinic_core::{
    ClinicError, DoctorId, DoctorRepository, IdKind, PatientId, PatientRepository, Repository,
    ReservationId, ReservationRepository, Result,
};
use clinic_runtime::metrics::IssuerMetrics;
use rand::Rng;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, PoisonError};

/// Source of candidate identifiers
pub trait IdGenerator: Send + Sync {
    /// A candidate of exactly `kind.digits()` ASCII digits
    fn candidate(&self, kind: IdKind) -> String;
}

/// Uniformly random digits with a non-zero leading digit
#[derive(Debug, Clone, Copy, Default)]
pub struct RandomDigits;

impl IdGenerator for RandomDigits {
    fn candidate(&self, kind: IdKind) -> String {
        let mut rng = rand::thread_rng();
        let mut id = String::with_capacity(kind.digits());
        id.push(char::from(b'0' + rng.gen_range(1..=9_u8)));
        for _ in 1..kind.digits() {
            id.push(char::from(b'0' + rng.gen_range(0..=9_u8)));
        }
        id
    }
}

/// Issues unique identifiers for doctors, patients and reservations.
pub struct IdIssuer {
    generator: Arc<dyn IdGenerator>,
    doctors: Arc<dyn DoctorRepository>,
    patients: Arc<dyn PatientRepository>,
    reservations: Arc<dyn ReservationRepository>,
    claimed: Mutex<HashMap<IdKind, HashSet<String>>>,
    max_attempts: u32,
}

impl IdIssuer {
    /// Creates an issuer checking candidates against the given repositories
    #[must_use]
    pub fn new(
        generator: Arc<dyn IdGenerator>,
        doctors: Arc<dyn DoctorRepository>,
        patients: Arc<dyn PatientRepository>,
        reservations: Arc<dyn ReservationRepository>,
        max_attempts: u32,
    ) -> Self {
        Self {
            generator,
            doctors,
            patients,
            reservations,
            claimed: Mutex::new(HashMap::new()),
            max_attempts: max_attempts.max(1),
        }
    }

    /// Issues a new identifier of `kind`.
    ///
    /// # Errors
    ///
    /// - [`ClinicError::IssuanceConflict`] if every candidate within the
    ///   attempt budget was already taken
    /// - [`ClinicError::Repository`] if the existence check fails
    pub async fn issue(&self, kind: IdKind) -> Result<String> {
        for attempt in 1..=self.max_attempts {
            let candidate = self.generator.candidate(kind);

            if !self.claim(kind, &candidate) {
                IssuerMetrics::record_collision(kind.as_str());
                tracing::debug!(%kind, attempt, "Candidate already claimed");
                continue;
            }

            match self.is_stored(kind, &candidate).await {
                Ok(false) => {
                    IssuerMetrics::record_issued(kind.as_str());
                    return Ok(candidate);
                }
                Ok(true) => {
                    self.unclaim(kind, &candidate);
                    IssuerMetrics::record_collision(kind.as_str());
                    tracing::debug!(%kind, attempt, "Candidate already stored");
                }
                Err(err) => {
                    self.unclaim(kind, &candidate);
                    return Err(err);
                }
            }
        }

        tracing::warn!(%kind, attempts = self.max_attempts, "Identifier issuance exhausted");
        Err(ClinicError::IssuanceConflict {
            kind,
            attempts: self.max_attempts,
        })
    }

    /// Issues a doctor identifier.
    ///
    /// # Errors
    ///
    /// See [`IdIssuer::issue`].
    pub async fn doctor_id(&self) -> Result<DoctorId> {
        DoctorId::parse(self.issue(IdKind::Doctor).await?)
    }

    /// Issues a patient identifier.
    ///
    /// # Errors
    ///
    /// See [`IdIssuer::issue`].
    pub async fn patient_id(&self) -> Result<PatientId> {
        PatientId::parse(self.issue(IdKind::Patient).await?)
    }

    /// Issues a reservation number.
    ///
    /// # Errors
    ///
    /// See [`IdIssuer::issue`].
    pub async fn reservation_id(&self) -> Result<ReservationId> {
        ReservationId::parse(self.issue(IdKind::Reservation).await?)
    }

    /// Drops the claim on an issued identifier once its record has been
    /// saved, or once the save has failed and the identifier is abandoned.
    pub fn settle(&self, kind: IdKind, id: &str) {
        self.unclaim(kind, id);
    }

    /// Identifiers issued but not yet settled
    #[must_use]
    pub fn in_flight(&self) -> usize {
        self.claimed
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .map(HashSet::len)
            .sum()
    }

    fn claim(&self, kind: IdKind, candidate: &str) -> bool {
        self.claimed
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(kind)
            .or_default()
            .insert(candidate.to_string())
    }

    fn unclaim(&self, kind: IdKind, candidate: &str) {
        if let Some(set) = self
            .claimed
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get_mut(&kind)
        {
            set.remove(candidate);
        }
    }

    async fn is_stored(&self, kind: IdKind, candidate: &str) -> Result<bool> {
        let stored = match kind {
            IdKind::Doctor => self
                .doctors
                .get(&DoctorId::parse(candidate)?)
                .await?
                .is_some(),
            IdKind::Patient => self
                .patients
                .get(&PatientId::parse(candidate)?)
                .await?
                .is_some(),
            IdKind::Reservation => self
                .reservations
                .get(&ReservationId::parse(candidate)?)
                .await?
                .is_some(),
        };
        Ok(stored)
    }
}
