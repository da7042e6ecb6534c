//! SQL for the jaffle shop models.
//!
//! Each model reads its upstream tables as views named after the upstream
//! stage's input alias and returns one result set.

use std::path::Path;

/// Payment methods pivoted into per-method amount columns of `orders`.
pub const PAYMENT_METHODS: [&str; 4] = ["credit_card", "coupon", "bank_transfer", "gift_card"];

/// Quote a filesystem path as a SQL string literal.
fn quote_path(path: &Path) -> String {
    format!("'{}'", path.display().to_string().replace('\'', "''"))
}

/// View `name` over a single parquet file.
pub fn create_view(name: &str, parquet: &Path) -> String {
    format!(
        "CREATE OR REPLACE VIEW {name} AS SELECT * FROM read_parquet({})",
        quote_path(parquet)
    )
}

/// Write the result of `query` to a parquet file.
pub fn export(query: &str, parquet: &Path) -> String {
    format!(
        "COPY ({query}) TO {} (FORMAT PARQUET)",
        quote_path(parquet)
    )
}

pub fn stg_customers() -> &'static str {
    "SELECT id AS customer_id, first_name, last_name FROM source"
}

pub fn stg_orders() -> &'static str {
    "SELECT id AS order_id, user_id AS customer_id, order_date, status FROM source"
}

/// Amounts are stored in cents upstream.
pub fn stg_payments() -> &'static str {
    "SELECT id AS payment_id, order_id, payment_method, amount / 100 AS amount FROM source"
}

/// One row per customer with order history and lifetime value.
pub fn customers() -> &'static str {
    "\
WITH customer_orders AS (
    SELECT
        customer_id,
        min(order_date) AS first_order,
        max(order_date) AS most_recent_order,
        count(order_id) AS number_of_orders
    FROM orders
    GROUP BY customer_id
),

customer_payments AS (
    SELECT
        orders.customer_id,
        sum(amount) AS total_amount
    FROM payments
    LEFT JOIN orders ON payments.order_id = orders.order_id
    GROUP BY orders.customer_id
),

final AS (
    SELECT
        customers.customer_id,
        customers.first_name,
        customers.last_name,
        customer_orders.first_order,
        customer_orders.most_recent_order,
        customer_orders.number_of_orders,
        customer_payments.total_amount AS customer_lifetime_value
    FROM customers
    LEFT JOIN customer_orders ON customers.customer_id = customer_orders.customer_id
    LEFT JOIN customer_payments ON customers.customer_id = customer_payments.customer_id
)

SELECT * FROM final ORDER BY customer_id"
}

/// One row per order with payment amounts split by method.
pub fn orders() -> String {
    let amounts: Vec<String> = PAYMENT_METHODS
        .iter()
        .map(|m| format!("sum(CASE WHEN payment_method = '{m}' THEN amount ELSE 0 END) AS {m}_amount"))
        .collect();
    let final_amounts: Vec<String> = PAYMENT_METHODS
        .iter()
        .map(|m| format!("order_payments.{m}_amount"))
        .collect();
    format!(
        "\
WITH order_payments AS (
    SELECT
        order_id,
        {},
        sum(amount) AS total_amount
    FROM payments
    GROUP BY order_id
),

final AS (
    SELECT
        orders.order_id,
        orders.customer_id,
        orders.order_date,
        orders.status,
        {},
        order_payments.total_amount AS amount
    FROM orders
    LEFT JOIN order_payments ON orders.order_id = order_payments.order_id
)

SELECT * FROM final ORDER BY order_id",
        amounts.join(",\n        "),
        final_amounts.join(",\n        "),
    )
}
