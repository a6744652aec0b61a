#![allow(dead_code)]

use rusqlite::Connection;
use serde_json::Value;
use tribes_core::model::tribe::Membership;
use tribes_core::repo::{SqliteTribeRepository, TribeRepository};
use tribes_core::service::proposal_service::CreatedItem;
use tribes_core::{
    open_db_in_memory, DigestService, EngineConfig, ManualClock, MembershipService,
    MessageService, PermissionService, PersonalService, ProposalService, RecordingNotifier,
    ServiceContext, Tribe, TribeId, TribeType,
};

pub const START_MS: i64 = 1_700_000_000_000;

/// In-memory database plus deterministic clock and recording notifier.
pub struct Harness {
    pub conn: Connection,
    pub clock: ManualClock,
    pub config: EngineConfig,
    pub notifier: RecordingNotifier,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_config(EngineConfig::default())
    }

    pub fn with_config(config: EngineConfig) -> Self {
        Self {
            conn: open_db_in_memory().unwrap(),
            clock: ManualClock::new(START_MS),
            config,
            notifier: RecordingNotifier::new(),
        }
    }

    pub fn ctx(&self) -> ServiceContext<'_> {
        ServiceContext::new(&self.clock, &self.config, &self.notifier)
    }

    pub fn membership(&self) -> MembershipService<'_> {
        MembershipService::new(&self.conn, self.ctx())
    }

    pub fn proposals(&self) -> ProposalService<'_> {
        ProposalService::new(&self.conn, self.ctx())
    }

    pub fn personal(&self) -> PersonalService<'_> {
        PersonalService::new(&self.conn, self.ctx())
    }

    pub fn messages(&self) -> MessageService<'_> {
        MessageService::new(&self.conn, self.ctx())
    }

    pub fn digest(&self) -> DigestService<'_> {
        DigestService::new(&self.conn, self.ctx())
    }

    pub fn permissions(&self) -> PermissionService<'_> {
        PermissionService::new(&self.conn)
    }

    pub fn tick(&self) {
        self.clock.advance_ms(1);
    }

    /// A tribe owned by `owner` in which every `member` has accepted.
    pub fn tribe_with_members(&self, owner: &str, members: &[&str]) -> Tribe {
        let tribe = self
            .membership()
            .create_tribe(owner, "Home", TribeType::Family)
            .unwrap();
        for member in members {
            self.tick();
            self.membership()
                .invite_member(owner, tribe.id, member, None)
                .unwrap();
            self.membership().accept_invitation(member, tribe.id).unwrap();
        }
        self.tick();
        tribe
    }

    pub fn membership_of(&self, tribe_id: TribeId, user_id: &str) -> Membership {
        SqliteTribeRepository::new(&self.conn)
            .find_membership(tribe_id, user_id)
            .unwrap()
            .unwrap()
    }

    pub fn propose(
        &self,
        tribe_id: TribeId,
        creator: &str,
        item_type: &str,
        data: Value,
        recipients: &[&str],
    ) -> CreatedItem {
        let recipients: Vec<String> = recipients.iter().map(|user| user.to_string()).collect();
        let created = self
            .proposals()
            .create_item_and_proposals(tribe_id, creator, item_type, data, &recipients)
            .unwrap();
        self.tick();
        created
    }

    pub fn count_rows(&self, table: &str) -> i64 {
        self.conn
            .query_row(&format!("SELECT COUNT(*) FROM {table};"), [], |row| row.get(0))
            .unwrap()
    }
}

pub fn users(ids: &[&str]) -> Vec<String> {
    ids.iter().map(|user| user.to_string()).collect()
}
