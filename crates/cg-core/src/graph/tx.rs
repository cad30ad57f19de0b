//! Graph primitives over an open transaction

use rusqlite::{OptionalExtension, Transaction, params};

use crate::graph::{Properties, PropertyValue};
use crate::Result;

/// Row id of a node in `graph_nodes`
pub type NodeId = i64;

/// Row id of a relationship in `graph_relationships`
pub type RelationshipId = i64;

/// A labeled property graph view over one SQLite transaction
///
/// Obtained from [`GraphDriver::write`](crate::graph::GraphDriver::write) or
/// [`GraphDriver::read`](crate::graph::GraphDriver::read); every change made
/// through it becomes visible only if the surrounding scope commits.
pub struct GraphTx<'c> {
    tx: Transaction<'c>,
}

impl<'c> GraphTx<'c> {
    pub(crate) fn new(tx: Transaction<'c>) -> Self {
        Self { tx }
    }

    pub(crate) fn commit(self) -> Result<()> {
        self.tx.commit()?;
        Ok(())
    }

    /// Find the first node with `label` whose property `key` equals `value`
    pub fn find_node(&self, label: &str, key: &str, value: &PropertyValue) -> Result<Option<NodeId>> {
        let mut stmt = self.tx.prepare_cached(
            "SELECT n.id FROM graph_nodes n
             JOIN graph_properties p ON p.node_id = n.id
             WHERE n.label = ?1 AND p.key = ?2 AND p.value = ?3
             ORDER BY n.id
             LIMIT 1",
        )?;
        let id = stmt.query_row(params![label, key, value], |row| row.get(0)).optional()?;
        Ok(id)
    }

    /// Match a node by label and key property, creating it when absent
    ///
    /// Returns the node and whether it was created by this call.
    pub fn merge_node(&self, label: &str, key: &str, value: &PropertyValue) -> Result<(NodeId, bool)> {
        if let Some(id) = self.find_node(label, key, value)? {
            return Ok((id, false));
        }
        let mut properties = Properties::new();
        properties.insert(key.to_string(), value.clone());
        Ok((self.create_node(label, &properties)?, true))
    }

    /// Create a node; null properties are not stored
    pub fn create_node(&self, label: &str, properties: &Properties) -> Result<NodeId> {
        self.tx
            .prepare_cached("INSERT INTO graph_nodes (label) VALUES (?1)")?
            .execute([label])?;
        let id = self.tx.last_insert_rowid();
        for (key, value) in properties {
            if !value.is_null() {
                self.set_property(id, key, value)?;
            }
        }
        Ok(id)
    }

    /// All nodes carrying `label`, oldest first
    pub fn nodes_by_label(&self, label: &str) -> Result<Vec<NodeId>> {
        let mut stmt = self
            .tx
            .prepare_cached("SELECT id FROM graph_nodes WHERE label = ?1 ORDER BY id")?;
        let nodes = stmt
            .query_map([label], |row| row.get(0))?
            .collect::<std::result::Result<Vec<NodeId>, _>>()?;
        Ok(nodes)
    }

    /// Label of a node, `None` if the node does not exist
    pub fn label(&self, node: NodeId) -> Result<Option<String>> {
        let mut stmt = self.tx.prepare_cached("SELECT label FROM graph_nodes WHERE id = ?1")?;
        let label = stmt.query_row([node], |row| row.get(0)).optional()?;
        Ok(label)
    }

    /// Insert or overwrite a single property
    pub fn set_property(&self, node: NodeId, key: &str, value: &PropertyValue) -> Result<()> {
        self.tx
            .prepare_cached(
                "INSERT INTO graph_properties (node_id, key, value) VALUES (?1, ?2, ?3)
                 ON CONFLICT (node_id, key) DO UPDATE SET value = excluded.value",
            )?
            .execute(params![node, key, value])?;
        Ok(())
    }

    pub fn property(&self, node: NodeId, key: &str) -> Result<Option<PropertyValue>> {
        let mut stmt = self
            .tx
            .prepare_cached("SELECT value FROM graph_properties WHERE node_id = ?1 AND key = ?2")?;
        let value = stmt.query_row(params![node, key], |row| row.get(0)).optional()?;
        Ok(value)
    }

    pub fn properties(&self, node: NodeId) -> Result<Properties> {
        let mut stmt = self
            .tx
            .prepare_cached("SELECT key, value FROM graph_properties WHERE node_id = ?1")?;
        let properties = stmt
            .query_map([node], |row| Ok((row.get::<_, String>(0)?, row.get::<_, PropertyValue>(1)?)))?
            .collect::<std::result::Result<Properties, _>>()?;
        Ok(properties)
    }

    /// Create a `(start)-[rel_type]->(end)` relationship
    pub fn relate(&self, start: NodeId, rel_type: &str, end: NodeId) -> Result<RelationshipId> {
        self.tx
            .prepare_cached("INSERT INTO graph_relationships (rel_type, start_id, end_id) VALUES (?1, ?2, ?3)")?
            .execute(params![rel_type, start, end])?;
        Ok(self.tx.last_insert_rowid())
    }

    /// End nodes of `(start)-[rel_type]->()`, in creation order
    pub fn related(&self, start: NodeId, rel_type: &str) -> Result<Vec<NodeId>> {
        let mut stmt = self.tx.prepare_cached(
            "SELECT end_id FROM graph_relationships
             WHERE start_id = ?1 AND rel_type = ?2
             ORDER BY id",
        )?;
        let nodes = stmt
            .query_map(params![start, rel_type], |row| row.get(0))?
            .collect::<std::result::Result<Vec<NodeId>, _>>()?;
        Ok(nodes)
    }

    /// End nodes of `(start)-[rel_type]->()` with the largest `order_key`
    /// property values, largest first, at most `limit` of them
    ///
    /// Nodes without an `order_key` property sort ahead of every other node.
    pub fn latest_related_by(
        &self,
        start: NodeId,
        rel_type: &str,
        order_key: &str,
        limit: usize,
    ) -> Result<Vec<NodeId>> {
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let mut stmt = self.tx.prepare_cached(
            "SELECT r.end_id FROM graph_relationships r
             LEFT JOIN graph_properties p ON p.node_id = r.end_id AND p.key = ?3
             WHERE r.start_id = ?1 AND r.rel_type = ?2
             ORDER BY p.value IS NULL DESC, p.value DESC
             LIMIT ?4",
        )?;
        let nodes = stmt
            .query_map(params![start, rel_type, order_key, limit], |row| row.get(0))?
            .collect::<std::result::Result<Vec<NodeId>, _>>()?;
        Ok(nodes)
    }

    /// Delete nodes together with their properties and every relationship
    /// touching them; returns how many nodes were removed
    pub fn detach_delete(&self, nodes: &[NodeId]) -> Result<usize> {
        let mut deleted = 0;
        for node in nodes {
            self.tx
                .prepare_cached("DELETE FROM graph_relationships WHERE start_id = ?1 OR end_id = ?1")?
                .execute([node])?;
            self.tx
                .prepare_cached("DELETE FROM graph_properties WHERE node_id = ?1")?
                .execute([node])?;
            deleted += self
                .tx
                .prepare_cached("DELETE FROM graph_nodes WHERE id = ?1")?
                .execute([node])?;
        }
        Ok(deleted)
    }
}
