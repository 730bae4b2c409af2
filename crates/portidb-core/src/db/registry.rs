use crate::db::database::Database;
use std::{cell::RefCell, collections::HashMap, rc::Rc};

///
/// Registry
///
/// Databases known to one factory, by name. Entries live until the
/// database is deleted or the factory is dropped.
///

#[derive(Debug, Default)]
pub(crate) struct Registry {
    databases: RefCell<HashMap<String, Rc<Database>>>,
}

impl Registry {
    pub(crate) fn get(&self, name: &str) -> Option<Rc<Database>> {
        self.databases.borrow().get(name).cloned()
    }

    pub(crate) fn insert(&self, db: Rc<Database>) {
        self.databases.borrow_mut().insert(db.name().to_string(), db);
    }

    pub(crate) fn remove(&self, name: &str) -> Option<Rc<Database>> {
        self.databases.borrow_mut().remove(name)
    }
}
