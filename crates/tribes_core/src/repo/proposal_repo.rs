//! Item, proposal and proposal-action persistence.
//!
//! # Responsibility
//! - Create one item and its per-recipient proposals atomically.
//! - Apply state transitions with compare-and-swap semantics.
//! - Keep the command-dedup ledger in the same transaction as the mutation.
//!
//! # Invariants
//! - Inserts never take a state; every proposal row starts as `proposed`.
//! - A transition changes a row only if its state still equals the state
//!   the caller read (`WHERE id = ? AND state = ?`).
//! - `(user_id, idempotency_key)` is unique in `tribe_proposal_actions`.
//! - A keyed transition checks the ledger under the write lock before the
//!   CAS, so a concurrent retry replays instead of losing the race.

use crate::model::item::{ItemId, ItemType, TribeItem};
use crate::model::proposal::{Proposal, ProposalAction, ProposalId, ProposalState};
use crate::model::tribe::{Membership, MembershipId};
use crate::repo::tribe_repo::{parse_membership_row, MEMBERSHIP_COLUMNS};
use crate::repo::{begin_immediate, is_unique_violation, parse_uuid, to_u32, RepoError, RepoResult};
use rusqlite::{params, Connection, OptionalExtension, Row};

const PROPOSAL_COLUMNS: &str = "p.id, p.item_id, p.recipient_id, p.state, p.created_at, p.state_changed_at";
const ITEM_COLUMNS: &str = "i.id, i.tribe_id, i.created_by, i.item_type, i.data, i.created_at";

/// Outcome of a guarded transition write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransitionWrite {
    Applied(Proposal),
    /// The row no longer held the expected state; carries the current one.
    StateChanged(ProposalState),
    /// The dedup key was already recorded; carries the proposal it was recorded for.
    Replayed(Proposal),
    /// The dedup key was recorded concurrently; nothing was written.
    DuplicateKey,
}

/// A proposal together with the item it offers.
#[derive(Debug, Clone, PartialEq)]
pub struct InboxEntry {
    pub proposal: Proposal,
    pub item: TribeItem,
}

/// An accepted proposal with the context needed to materialize it.
#[derive(Debug, Clone, PartialEq)]
pub struct AcceptedProposal {
    pub proposal: Proposal,
    pub item: TribeItem,
    pub membership: Membership,
    pub tribe_name: String,
}

pub trait ProposalRepository {
    fn insert_item_with_proposals(&self, item: &TribeItem, proposals: &[Proposal])
        -> RepoResult<()>;
    fn get_item(&self, item_id: ItemId) -> RepoResult<Option<TribeItem>>;
    fn get_proposal(&self, proposal_id: ProposalId) -> RepoResult<Option<Proposal>>;
    /// The proposal only if its recipient membership belongs to `user_id`.
    fn find_proposal_for_user(
        &self,
        proposal_id: ProposalId,
        user_id: &str,
    ) -> RepoResult<Option<(Proposal, Membership)>>;
    fn find_action(&self, user_id: &str, idempotency_key: &str)
        -> RepoResult<Option<ProposalAction>>;
    /// CAS `from -> to` plus optional ledger row, atomically.
    fn commit_transition(
        &self,
        proposal_id: ProposalId,
        from: ProposalState,
        to: ProposalState,
        changed_at: i64,
        action: Option<&ProposalAction>,
    ) -> RepoResult<TransitionWrite>;
    /// Open proposals of a membership, newest first, minus items suppressed
    /// for `user_id`.
    fn list_inbox(&self, membership_id: MembershipId, user_id: &str)
        -> RepoResult<Vec<InboxEntry>>;
    /// Accepted proposals of a membership, most recently accepted first.
    fn list_accepted(&self, membership_id: MembershipId) -> RepoResult<Vec<InboxEntry>>;
    fn count_pending(&self, membership_id: MembershipId) -> RepoResult<u32>;
    /// Accepted proposals on active, materializing memberships in live tribes.
    fn list_accepted_for_user(&self, user_id: &str) -> RepoResult<Vec<AcceptedProposal>>;
    fn list_proposals_for_item(&self, item_id: ItemId) -> RepoResult<Vec<Proposal>>;
}

pub struct SqliteProposalRepository<'conn> {
    conn: &'conn Connection,
}

impl<'conn> SqliteProposalRepository<'conn> {
    pub fn new(conn: &'conn Connection) -> Self {
        Self { conn }
    }
}

impl ProposalRepository for SqliteProposalRepository<'_> {
    fn insert_item_with_proposals(
        &self,
        item: &TribeItem,
        proposals: &[Proposal],
    ) -> RepoResult<()> {
        let data = serde_json::to_string(&item.data)
            .map_err(|err| RepoError::InvalidData(format!("unserializable item data: {err}")))?;

        let tx = begin_immediate(self.conn)?;
        tx.execute(
            "INSERT INTO tribe_items (id, tribe_id, created_by, item_type, data, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6);",
            params![
                item.id.to_string(),
                item.tribe_id.to_string(),
                item.created_by.as_str(),
                item.item_type.as_str(),
                data,
                item.created_at,
            ],
        )?;
        {
            let mut stmt = tx.prepare(
                "INSERT INTO tribe_proposals (id, item_id, recipient_id, created_at, state_changed_at)
                 VALUES (?1, ?2, ?3, ?4, ?5);",
            )?;
            for proposal in proposals {
                if proposal.item_id != item.id {
                    return Err(RepoError::InvalidData(format!(
                        "proposal {} does not reference item {}",
                        proposal.id, item.id
                    )));
                }
                stmt.execute(params![
                    proposal.id.to_string(),
                    proposal.item_id.to_string(),
                    proposal.recipient_id.to_string(),
                    proposal.created_at,
                    proposal.state_changed_at,
                ])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    fn get_item(&self, item_id: ItemId) -> RepoResult<Option<TribeItem>> {
        let sql = format!("SELECT {ITEM_COLUMNS} FROM tribe_items i WHERE i.id = ?1;");
        self.conn
            .query_row(&sql, [item_id.to_string()], |row| Ok(parse_item_row(row, 0)))
            .optional()?
            .transpose()
    }

    fn get_proposal(&self, proposal_id: ProposalId) -> RepoResult<Option<Proposal>> {
        get_proposal_row(self.conn, proposal_id)
    }

    fn find_proposal_for_user(
        &self,
        proposal_id: ProposalId,
        user_id: &str,
    ) -> RepoResult<Option<(Proposal, Membership)>> {
        let sql = format!(
            "SELECT {PROPOSAL_COLUMNS}, {MEMBERSHIP_COLUMNS}
             FROM tribe_proposals p
             INNER JOIN tribe_members m ON m.id = p.recipient_id
             WHERE p.id = ?1
               AND m.user_id = ?2;"
        );
        self.conn
            .query_row(&sql, params![proposal_id.to_string(), user_id], |row| {
                Ok(parse_proposal_row(row, 0).and_then(|proposal| {
                    parse_membership_row(row, 6).map(|membership| (proposal, membership))
                }))
            })
            .optional()?
            .transpose()
    }

    fn find_action(
        &self,
        user_id: &str,
        idempotency_key: &str,
    ) -> RepoResult<Option<ProposalAction>> {
        find_action_row(self.conn, user_id, idempotency_key)
    }

    fn commit_transition(
        &self,
        proposal_id: ProposalId,
        from: ProposalState,
        to: ProposalState,
        changed_at: i64,
        action: Option<&ProposalAction>,
    ) -> RepoResult<TransitionWrite> {
        let tx = begin_immediate(self.conn)?;
        if let Some(action) = action {
            if let Some(recorded) =
                find_action_row(&tx, &action.user_id, &action.idempotency_key)?
            {
                let proposal = get_proposal_row(&tx, recorded.proposal_id)?.ok_or_else(|| {
                    RepoError::NotFound {
                        entity: "proposal",
                        id: recorded.proposal_id.to_string(),
                    }
                })?;
                return Ok(TransitionWrite::Replayed(proposal));
            }
        }

        let changed = tx.execute(
            "UPDATE tribe_proposals
             SET state = ?3, state_changed_at = ?4
             WHERE id = ?1
               AND state = ?2;",
            params![
                proposal_id.to_string(),
                from.as_str(),
                to.as_str(),
                changed_at
            ],
        )?;
        if changed == 0 {
            let current = get_proposal_row(&tx, proposal_id)?
                .map(|proposal| proposal.state)
                .ok_or_else(|| RepoError::NotFound {
                    entity: "proposal",
                    id: proposal_id.to_string(),
                })?;
            return Ok(TransitionWrite::StateChanged(current));
        }

        if let Some(action) = action {
            let inserted = tx.execute(
                "INSERT INTO tribe_proposal_actions (
                    id,
                    user_id,
                    proposal_id,
                    idempotency_key,
                    action,
                    result_state,
                    created_at
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7);",
                params![
                    action.id.to_string(),
                    action.user_id.as_str(),
                    action.proposal_id.to_string(),
                    action.idempotency_key.as_str(),
                    action.action.as_str(),
                    action.result_state.as_str(),
                    action.created_at,
                ],
            );
            match inserted {
                Ok(_) => {}
                Err(err) if is_unique_violation(&err) => {
                    return Ok(TransitionWrite::DuplicateKey);
                }
                Err(err) => return Err(err.into()),
            }
        }

        let updated = get_proposal_row(&tx, proposal_id)?.ok_or_else(|| RepoError::NotFound {
            entity: "proposal",
            id: proposal_id.to_string(),
        })?;
        tx.commit()?;
        Ok(TransitionWrite::Applied(updated))
    }

    fn list_inbox(
        &self,
        membership_id: MembershipId,
        user_id: &str,
    ) -> RepoResult<Vec<InboxEntry>> {
        let sql = format!(
            "SELECT {PROPOSAL_COLUMNS}, {ITEM_COLUMNS}
             FROM tribe_proposals p
             INNER JOIN tribe_items i ON i.id = p.item_id
             WHERE p.recipient_id = ?1
               AND p.state IN ('proposed', 'not_now')
               AND NOT EXISTS (
                   SELECT 1
                   FROM personal_item_suppressions s
                   WHERE s.user_id = ?2
                     AND s.origin_item_id = p.item_id
               )
             ORDER BY p.created_at DESC, p.id ASC;"
        );
        query_entries(self.conn, &sql, params![membership_id.to_string(), user_id])
    }

    fn list_accepted(&self, membership_id: MembershipId) -> RepoResult<Vec<InboxEntry>> {
        let sql = format!(
            "SELECT {PROPOSAL_COLUMNS}, {ITEM_COLUMNS}
             FROM tribe_proposals p
             INNER JOIN tribe_items i ON i.id = p.item_id
             WHERE p.recipient_id = ?1
               AND p.state = 'accepted'
             ORDER BY p.state_changed_at DESC, p.id ASC;"
        );
        query_entries(self.conn, &sql, params![membership_id.to_string()])
    }

    fn count_pending(&self, membership_id: MembershipId) -> RepoResult<u32> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*)
             FROM tribe_proposals
             WHERE recipient_id = ?1
               AND state = 'proposed';",
            [membership_id.to_string()],
            |row| row.get(0),
        )?;
        to_u32(count, "tribe_proposals count")
    }

    fn list_accepted_for_user(&self, user_id: &str) -> RepoResult<Vec<AcceptedProposal>> {
        let sql = format!(
            "SELECT {PROPOSAL_COLUMNS}, {ITEM_COLUMNS}, {MEMBERSHIP_COLUMNS}, t.name
             FROM tribe_proposals p
             INNER JOIN tribe_items i ON i.id = p.item_id
             INNER JOIN tribe_members m ON m.id = p.recipient_id
             INNER JOIN tribes t ON t.id = m.tribe_id
             WHERE m.user_id = ?1
               AND p.state = 'accepted'
               AND m.accepted_at IS NOT NULL
               AND m.left_at IS NULL
               AND m.management_scope = 'shared_and_personal'
               AND t.deleted_at IS NULL
             ORDER BY p.state_changed_at ASC, p.id ASC;"
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let mut rows = stmt.query([user_id])?;
        let mut accepted = Vec::new();
        while let Some(row) = rows.next()? {
            accepted.push(AcceptedProposal {
                proposal: parse_proposal_row(row, 0)?,
                item: parse_item_row(row, 6)?,
                membership: parse_membership_row(row, 12)?,
                tribe_name: row.get(31)?,
            });
        }
        Ok(accepted)
    }

    fn list_proposals_for_item(&self, item_id: ItemId) -> RepoResult<Vec<Proposal>> {
        let sql = format!(
            "SELECT {PROPOSAL_COLUMNS}
             FROM tribe_proposals p
             WHERE p.item_id = ?1
             ORDER BY p.created_at ASC, p.id ASC;"
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let mut rows = stmt.query([item_id.to_string()])?;
        let mut proposals = Vec::new();
        while let Some(row) = rows.next()? {
            proposals.push(parse_proposal_row(row, 0)?);
        }
        Ok(proposals)
    }
}

fn find_action_row(
    conn: &Connection,
    user_id: &str,
    idempotency_key: &str,
) -> RepoResult<Option<ProposalAction>> {
    conn.query_row(
        "SELECT id, user_id, proposal_id, idempotency_key, action, result_state, created_at
         FROM tribe_proposal_actions
         WHERE user_id = ?1
           AND idempotency_key = ?2;",
        params![user_id, idempotency_key],
        |row| Ok(parse_action_row(row)),
    )
    .optional()?
    .transpose()
}

fn get_proposal_row(conn: &Connection, proposal_id: ProposalId) -> RepoResult<Option<Proposal>> {
    let sql = format!("SELECT {PROPOSAL_COLUMNS} FROM tribe_proposals p WHERE p.id = ?1;");
    conn.query_row(&sql, [proposal_id.to_string()], |row| {
        Ok(parse_proposal_row(row, 0))
    })
    .optional()?
    .transpose()
}

fn query_entries<P: rusqlite::Params>(
    conn: &Connection,
    sql: &str,
    params: P,
) -> RepoResult<Vec<InboxEntry>> {
    let mut stmt = conn.prepare(sql)?;
    let mut rows = stmt.query(params)?;
    let mut entries = Vec::new();
    while let Some(row) = rows.next()? {
        entries.push(InboxEntry {
            proposal: parse_proposal_row(row, 0)?,
            item: parse_item_row(row, 6)?,
        });
    }
    Ok(entries)
}

fn parse_proposal_row(row: &Row<'_>, offset: usize) -> RepoResult<Proposal> {
    let id_text: String = row.get(offset)?;
    let item_text: String = row.get(offset + 1)?;
    let recipient_text: String = row.get(offset + 2)?;
    let state_text: String = row.get(offset + 3)?;
    Ok(Proposal {
        id: parse_uuid(&id_text, "tribe_proposals.id")?,
        item_id: parse_uuid(&item_text, "tribe_proposals.item_id")?,
        recipient_id: parse_uuid(&recipient_text, "tribe_proposals.recipient_id")?,
        state: parse_state(&state_text, "tribe_proposals.state")?,
        created_at: row.get(offset + 4)?,
        state_changed_at: row.get(offset + 5)?,
    })
}

fn parse_item_row(row: &Row<'_>, offset: usize) -> RepoResult<TribeItem> {
    let id_text: String = row.get(offset)?;
    let tribe_text: String = row.get(offset + 1)?;
    let type_text: String = row.get(offset + 3)?;
    let data_text: String = row.get(offset + 4)?;
    let item_type = ItemType::parse(&type_text)
        .map_err(|err| RepoError::InvalidData(format!("{err} in tribe_items.item_type")))?;
    let data = serde_json::from_str(&data_text)
        .map_err(|err| RepoError::InvalidData(format!("invalid json in tribe_items.data: {err}")))?;
    Ok(TribeItem {
        id: parse_uuid(&id_text, "tribe_items.id")?,
        tribe_id: parse_uuid(&tribe_text, "tribe_items.tribe_id")?,
        created_by: row.get(offset + 2)?,
        item_type,
        data,
        created_at: row.get(offset + 5)?,
    })
}

fn parse_action_row(row: &Row<'_>) -> RepoResult<ProposalAction> {
    let id_text: String = row.get(0)?;
    let proposal_text: String = row.get(2)?;
    let action_text: String = row.get(4)?;
    let result_text: String = row.get(5)?;
    Ok(ProposalAction {
        id: parse_uuid(&id_text, "tribe_proposal_actions.id")?,
        user_id: row.get(1)?,
        proposal_id: parse_uuid(&proposal_text, "tribe_proposal_actions.proposal_id")?,
        idempotency_key: row.get(3)?,
        action: parse_state(&action_text, "tribe_proposal_actions.action")?,
        result_state: parse_state(&result_text, "tribe_proposal_actions.result_state")?,
        created_at: row.get(6)?,
    })
}

fn parse_state(value: &str, column: &str) -> RepoResult<ProposalState> {
    ProposalState::parse(value).ok_or_else(|| {
        RepoError::InvalidData(format!("invalid proposal state `{value}` in {column}"))
    })
}
