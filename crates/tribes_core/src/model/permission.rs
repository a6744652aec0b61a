//! Per-membership permission matrix.
//!
//! Permissions are an explicit `(action, item type) -> flag` table. There is
//! no runtime composition of flag names from strings.

use crate::model::item::ItemType;
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};

/// Mutation a member attempts on tribe items.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PermissionAction {
    Add,
    Remove,
}

impl PermissionAction {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Add => "add",
            Self::Remove => "remove",
        }
    }
}

impl Display for PermissionAction {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One boolean in the membership permission set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PermissionFlag {
    AddAppointments,
    RemoveAppointments,
    AddTasks,
    RemoveTasks,
    AddRoutines,
    RemoveRoutines,
    AddGroceries,
    RemoveGroceries,
}

impl PermissionFlag {
    pub const ALL: [PermissionFlag; 8] = [
        PermissionFlag::AddAppointments,
        PermissionFlag::RemoveAppointments,
        PermissionFlag::AddTasks,
        PermissionFlag::RemoveTasks,
        PermissionFlag::AddRoutines,
        PermissionFlag::RemoveRoutines,
        PermissionFlag::AddGroceries,
        PermissionFlag::RemoveGroceries,
    ];

    /// The flag guarding `action` on items of `item_type`.
    pub fn resolve(action: PermissionAction, item_type: ItemType) -> Self {
        match (action, item_type) {
            (PermissionAction::Add, ItemType::Appointment) => Self::AddAppointments,
            (PermissionAction::Remove, ItemType::Appointment) => Self::RemoveAppointments,
            (PermissionAction::Add, ItemType::Task) => Self::AddTasks,
            (PermissionAction::Remove, ItemType::Task) => Self::RemoveTasks,
            (PermissionAction::Add, ItemType::Routine) => Self::AddRoutines,
            (PermissionAction::Remove, ItemType::Routine) => Self::RemoveRoutines,
            (PermissionAction::Add, ItemType::Grocery) => Self::AddGroceries,
            (PermissionAction::Remove, ItemType::Grocery) => Self::RemoveGroceries,
        }
    }

    /// Column name in `tribe_members`.
    pub fn column(self) -> &'static str {
        match self {
            Self::AddAppointments => "can_add_appointments",
            Self::RemoveAppointments => "can_remove_appointments",
            Self::AddTasks => "can_add_tasks",
            Self::RemoveTasks => "can_remove_tasks",
            Self::AddRoutines => "can_add_routines",
            Self::RemoveRoutines => "can_remove_routines",
            Self::AddGroceries => "can_add_groceries",
            Self::RemoveGroceries => "can_remove_groceries",
        }
    }
}

/// The eight permission booleans carried by a membership.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PermissionSet {
    pub can_add_appointments: bool,
    pub can_remove_appointments: bool,
    pub can_add_tasks: bool,
    pub can_remove_tasks: bool,
    pub can_add_routines: bool,
    pub can_remove_routines: bool,
    pub can_add_groceries: bool,
    pub can_remove_groceries: bool,
}

impl Default for PermissionSet {
    /// Invited members may add every item type and remove none.
    fn default() -> Self {
        Self {
            can_add_appointments: true,
            can_remove_appointments: false,
            can_add_tasks: true,
            can_remove_tasks: false,
            can_add_routines: true,
            can_remove_routines: false,
            can_add_groceries: true,
            can_remove_groceries: false,
        }
    }
}

impl PermissionSet {
    pub fn all_granted() -> Self {
        Self::uniform(true)
    }

    pub fn none_granted() -> Self {
        Self::uniform(false)
    }

    fn uniform(value: bool) -> Self {
        Self {
            can_add_appointments: value,
            can_remove_appointments: value,
            can_add_tasks: value,
            can_remove_tasks: value,
            can_add_routines: value,
            can_remove_routines: value,
            can_add_groceries: value,
            can_remove_groceries: value,
        }
    }

    pub fn get(&self, flag: PermissionFlag) -> bool {
        match flag {
            PermissionFlag::AddAppointments => self.can_add_appointments,
            PermissionFlag::RemoveAppointments => self.can_remove_appointments,
            PermissionFlag::AddTasks => self.can_add_tasks,
            PermissionFlag::RemoveTasks => self.can_remove_tasks,
            PermissionFlag::AddRoutines => self.can_add_routines,
            PermissionFlag::RemoveRoutines => self.can_remove_routines,
            PermissionFlag::AddGroceries => self.can_add_groceries,
            PermissionFlag::RemoveGroceries => self.can_remove_groceries,
        }
    }

    pub fn set(&mut self, flag: PermissionFlag, value: bool) {
        let slot = match flag {
            PermissionFlag::AddAppointments => &mut self.can_add_appointments,
            PermissionFlag::RemoveAppointments => &mut self.can_remove_appointments,
            PermissionFlag::AddTasks => &mut self.can_add_tasks,
            PermissionFlag::RemoveTasks => &mut self.can_remove_tasks,
            PermissionFlag::AddRoutines => &mut self.can_add_routines,
            PermissionFlag::RemoveRoutines => &mut self.can_remove_routines,
            PermissionFlag::AddGroceries => &mut self.can_add_groceries,
            PermissionFlag::RemoveGroceries => &mut self.can_remove_groceries,
        };
        *slot = value;
    }

    /// Builder-style `set`.
    pub fn with(mut self, flag: PermissionFlag, value: bool) -> Self {
        self.set(flag, value);
        self
    }

    pub fn allows(&self, action: PermissionAction, item_type: ItemType) -> bool {
        self.get(PermissionFlag::resolve(action, item_type))
    }
}

#[cfg(test)]
mod tests {
    use super::{PermissionAction, PermissionFlag, PermissionSet};
    use crate::model::item::ItemType;
    use std::collections::HashSet;

    #[test]
    fn resolve_is_a_bijection_onto_all_flags() {
        let mut seen = HashSet::new();
        for action in [PermissionAction::Add, PermissionAction::Remove] {
            for item_type in ItemType::ALL {
                assert!(seen.insert(PermissionFlag::resolve(action, item_type)));
            }
        }
        assert_eq!(seen.len(), PermissionFlag::ALL.len());
    }

    #[test]
    fn grocery_flags_use_irregular_plural_columns() {
        let add = PermissionFlag::resolve(PermissionAction::Add, ItemType::Grocery);
        let remove = PermissionFlag::resolve(PermissionAction::Remove, ItemType::Grocery);
        assert_eq!(add.column(), "can_add_groceries");
        assert_eq!(remove.column(), "can_remove_groceries");
    }

    #[test]
    fn default_set_allows_adds_only() {
        let set = PermissionSet::default();
        for item_type in ItemType::ALL {
            assert!(set.allows(PermissionAction::Add, item_type));
            assert!(!set.allows(PermissionAction::Remove, item_type));
        }
    }

    #[test]
    fn set_touches_exactly_one_flag() {
        let set = PermissionSet::none_granted().with(PermissionFlag::RemoveTasks, true);
        for flag in PermissionFlag::ALL {
            assert_eq!(set.get(flag), flag == PermissionFlag::RemoveTasks);
        }
    }
}
