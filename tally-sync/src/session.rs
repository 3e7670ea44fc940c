/// Signed-in tenant and its settings
use parking_lot::RwLock;
use tally_core::records::{ExchangeRates, Settings};
use tally_core::{Error, Result, TenantId};
use tracing::info;

#[derive(Debug, Default)]
pub struct Session {
    tenant: RwLock<Option<TenantId>>,
    settings: RwLock<Settings>,
}

impl Session {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn signed_in(tenant: TenantId) -> Self {
        let session = Self::new();
        session.sign_in(tenant);
        session
    }

    pub fn sign_in(&self, tenant: TenantId) {
        info!(tenant = %tenant, "Session started");
        *self.tenant.write() = Some(tenant);
    }

    pub fn sign_out(&self) {
        *self.tenant.write() = None;
        *self.settings.write() = Settings::default();
    }

    /// Current tenant, or `Error::Unauthenticated`
    pub fn tenant(&self) -> Result<TenantId> {
        self.tenant.read().clone().ok_or(Error::Unauthenticated)
    }

    pub fn settings(&self) -> Settings {
        self.settings.read().clone()
    }

    pub fn set_settings(&self, settings: Settings) {
        *self.settings.write() = settings;
    }

    pub fn allow_negative_stock(&self) -> bool {
        self.settings.read().accounting_settings.allow_negative_stock
    }

    pub fn decimal_precision(&self) -> u32 {
        self.settings.read().accounting_settings.decimal_precision
    }

    pub fn exchange_rates(&self) -> ExchangeRates {
        self.settings.read().exchange_rates.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_tenant() {
        let session = Session::new();
        assert!(matches!(session.tenant(), Err(Error::Unauthenticated)));

        session.sign_in(TenantId::from_str("t1"));
        assert_eq!(session.tenant().unwrap().as_str(), "t1");

        session.sign_out();
        assert!(session.tenant().is_err());
    }

    #[test]
    fn test_session_settings() {
        let session = Session::signed_in(TenantId::from_str("t1"));
        assert!(!session.allow_negative_stock());

        let mut settings = Settings::default();
        settings.accounting_settings.allow_negative_stock = true;
        settings.accounting_settings.decimal_precision = 2;
        session.set_settings(settings);
        assert!(session.allow_negative_stock());
        assert_eq!(session.decimal_precision(), 2);
    }
}
