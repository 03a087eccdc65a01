use serde::Serialize;

/// How a physical table relates to the business entity it is audited under.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "role", rename_all = "camelCase")]
pub enum TableConfig {
    /// Primary key is the entity id.
    Root { table: &'static str },
    /// 1:1 side table keyed by the parent entity id. Created empty alongside
    /// the parent, so its INSERTs carry nothing worth auditing.
    Extension { table: &'static str },
    /// Own primary key; `entity_id_column` holds the owning entity id.
    #[serde(rename_all = "camelCase")]
    Child {
        table: &'static str,
        entity_id_column: &'static str,
    },
    /// Only reachable through a junction table, resolved at dispatch time.
    Indirect {
        table: &'static str,
        junction: Junction,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Junction {
    pub table: &'static str,
    /// Junction column pointing at the indirect table's primary key.
    pub foreign_key: &'static str,
    /// Junction column holding the owning entity id.
    pub entity_id_column: &'static str,
}

impl TableConfig {
    pub fn table(&self) -> &'static str {
        match self {
            Self::Root { table }
            | Self::Extension { table }
            | Self::Child { table, .. }
            | Self::Indirect { table, .. } => table,
        }
    }

    pub fn role(&self) -> &'static str {
        match self {
            Self::Root { .. } => "root",
            Self::Extension { .. } => "extension",
            Self::Child { .. } => "child",
            Self::Indirect { .. } => "indirect",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct EntityDefinition {
    pub key: &'static str,
    pub label: &'static str,
    pub tables: &'static [TableConfig],
}

/// Display label per physical table, independent of entity grouping.
pub const TABLE_LABELS: &[(&str, &str)] = &[
    ("customer", "Customer"),
    ("customerPayment", "Customer Payment Terms"),
    ("customerShipping", "Customer Shipping"),
    ("customerLocation", "Customer Location"),
    ("customerContact", "Customer Contact Link"),
    ("supplier", "Supplier"),
    ("supplierPayment", "Supplier Payment Terms"),
    ("supplierShipping", "Supplier Shipping"),
    ("supplierLocation", "Supplier Location"),
    ("supplierContact", "Supplier Contact Link"),
    ("contact", "Contact"),
    ("address", "Address"),
    ("item", "Item"),
    ("itemCost", "Item Cost"),
    ("itemReplenishment", "Item Replenishment"),
    ("itemUnitSalePrice", "Item Sale Price"),
    ("purchaseOrder", "Purchase Order"),
    ("purchaseOrderLine", "Purchase Order Line"),
    ("purchaseOrderDelivery", "Purchase Order Delivery"),
    ("purchaseOrderPayment", "Purchase Order Payment"),
    ("salesOrder", "Sales Order"),
    ("salesOrderLine", "Sales Order Line"),
    ("salesOrderShipment", "Sales Order Shipment"),
    ("salesOrderPayment", "Sales Order Payment"),
    ("employee", "Employee"),
    ("employeeJob", "Employee Job"),
];

const CUSTOMER_CONTACT: Junction = Junction {
    table: "customerContact",
    foreign_key: "contactId",
    entity_id_column: "customerId",
};

const CUSTOMER_ADDRESS: Junction = Junction {
    table: "customerLocation",
    foreign_key: "addressId",
    entity_id_column: "customerId",
};

const SUPPLIER_CONTACT: Junction = Junction {
    table: "supplierContact",
    foreign_key: "contactId",
    entity_id_column: "supplierId",
};

const SUPPLIER_ADDRESS: Junction = Junction {
    table: "supplierLocation",
    foreign_key: "addressId",
    entity_id_column: "supplierId",
};

/// Every audited business entity and the tables that compose it.
pub const ENTITY_MAP: &[EntityDefinition] = &[
    EntityDefinition {
        key: "customer",
        label: "Customer",
        tables: &[
            TableConfig::Root { table: "customer" },
            TableConfig::Extension { table: "customerPayment" },
            TableConfig::Extension { table: "customerShipping" },
            TableConfig::Child {
                table: "customerLocation",
                entity_id_column: "customerId",
            },
            TableConfig::Child {
                table: "customerContact",
                entity_id_column: "customerId",
            },
            TableConfig::Indirect {
                table: "contact",
                junction: CUSTOMER_CONTACT,
            },
            TableConfig::Indirect {
                table: "address",
                junction: CUSTOMER_ADDRESS,
            },
        ],
    },
    EntityDefinition {
        key: "supplier",
        label: "Supplier",
        tables: &[
            TableConfig::Root { table: "supplier" },
            TableConfig::Extension { table: "supplierPayment" },
            TableConfig::Extension { table: "supplierShipping" },
            TableConfig::Child {
                table: "supplierLocation",
                entity_id_column: "supplierId",
            },
            TableConfig::Child {
                table: "supplierContact",
                entity_id_column: "supplierId",
            },
            TableConfig::Indirect {
                table: "contact",
                junction: SUPPLIER_CONTACT,
            },
            TableConfig::Indirect {
                table: "address",
                junction: SUPPLIER_ADDRESS,
            },
        ],
    },
    EntityDefinition {
        key: "item",
        label: "Item",
        tables: &[
            TableConfig::Root { table: "item" },
            TableConfig::Extension { table: "itemCost" },
            TableConfig::Extension { table: "itemReplenishment" },
            TableConfig::Extension { table: "itemUnitSalePrice" },
        ],
    },
    EntityDefinition {
        key: "purchaseOrder",
        label: "Purchase Order",
        tables: &[
            TableConfig::Root { table: "purchaseOrder" },
            TableConfig::Extension { table: "purchaseOrderDelivery" },
            TableConfig::Extension { table: "purchaseOrderPayment" },
            TableConfig::Child {
                table: "purchaseOrderLine",
                entity_id_column: "purchaseOrderId",
            },
        ],
    },
    EntityDefinition {
        key: "salesOrder",
        label: "Sales Order",
        tables: &[
            TableConfig::Root { table: "salesOrder" },
            TableConfig::Extension { table: "salesOrderShipment" },
            TableConfig::Extension { table: "salesOrderPayment" },
            TableConfig::Child {
                table: "salesOrderLine",
                entity_id_column: "salesOrderId",
            },
        ],
    },
    EntityDefinition {
        key: "employee",
        label: "Employee",
        tables: &[
            TableConfig::Root { table: "employee" },
            TableConfig::Extension { table: "employeeJob" },
        ],
    },
];
