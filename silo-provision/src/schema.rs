//! Tenant database schema.
//!
//! Applied to every new tenant database. Each statement checks for existence
//! first, so re-applying the script to a provisioned database is a no-op.

use silo_db::quote_identifier;

/// Business tables, enum types, indexes and default rows of a tenant database.
pub const TENANT_SCHEMA: &str = r##"
CREATE TABLE IF NOT EXISTS products (
    id UUID PRIMARY KEY DEFAULT gen_random_uuid(),
    name VARCHAR(255) NOT NULL,
    description TEXT,
    sku VARCHAR(100) UNIQUE,
    price DECIMAL(10,2) NOT NULL,
    stock INTEGER DEFAULT 0,
    active BOOLEAN DEFAULT true,
    created_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
    updated_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
);

CREATE TABLE IF NOT EXISTS services (
    id UUID PRIMARY KEY DEFAULT gen_random_uuid(),
    name VARCHAR(255) NOT NULL,
    description TEXT,
    duration_minutes INTEGER,
    price DECIMAL(10,2) NOT NULL,
    active BOOLEAN DEFAULT true,
    created_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
    updated_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
);

CREATE TABLE IF NOT EXISTS customers (
    id UUID PRIMARY KEY DEFAULT gen_random_uuid(),
    name VARCHAR(255) NOT NULL,
    email VARCHAR(255) UNIQUE,
    phone VARCHAR(50),
    document VARCHAR(50),
    address JSONB,
    created_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
    updated_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
);

CREATE TABLE IF NOT EXISTS orders (
    id UUID PRIMARY KEY DEFAULT gen_random_uuid(),
    customer_id UUID REFERENCES customers(id),
    total DECIMAL(10,2) NOT NULL,
    status VARCHAR(50) NOT NULL DEFAULT 'pending',
    notes TEXT,
    created_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
    updated_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
);

CREATE TABLE IF NOT EXISTS order_items (
    id UUID PRIMARY KEY DEFAULT gen_random_uuid(),
    order_id UUID REFERENCES orders(id) ON DELETE CASCADE,
    product_id UUID REFERENCES products(id),
    service_id UUID REFERENCES services(id),
    quantity INTEGER NOT NULL DEFAULT 1,
    unit_price DECIMAL(10,2) NOT NULL,
    subtotal DECIMAL(10,2) NOT NULL,
    created_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
);

CREATE TABLE IF NOT EXISTS settings (
    key VARCHAR(100) PRIMARY KEY,
    value JSONB NOT NULL,
    updated_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
);

INSERT INTO settings (key, value) VALUES
    ('interface', '{"logo": null, "primary_color": "#003388", "secondary_color": "#DDDDDD"}')
ON CONFLICT (key) DO NOTHING;

DO $$ BEGIN
    CREATE TYPE media_type AS ENUM ('image', 'video', 'document');
EXCEPTION WHEN duplicate_object THEN NULL;
END $$;

DO $$ BEGIN
    CREATE TYPE image_variant AS ENUM ('original', 'medium', 'small', 'thumb');
EXCEPTION WHEN duplicate_object THEN NULL;
END $$;

CREATE TABLE IF NOT EXISTS images (
    id UUID PRIMARY KEY DEFAULT gen_random_uuid(),
    imageable_type VARCHAR(50) NOT NULL,
    imageable_id UUID NOT NULL,
    filename VARCHAR(255) NOT NULL,
    original_filename VARCHAR(255),
    title VARCHAR(255),
    alt_text VARCHAR(255),
    media_type media_type NOT NULL DEFAULT 'image',
    mime_type VARCHAR(100) NOT NULL,
    extension VARCHAR(10) NOT NULL,
    variant image_variant NOT NULL DEFAULT 'original',
    parent_id UUID REFERENCES images(id) ON DELETE CASCADE,
    width INTEGER,
    height INTEGER,
    file_size BIGINT,
    storage_driver VARCHAR(20) NOT NULL DEFAULT 'local',
    storage_path TEXT NOT NULL,
    public_url TEXT,
    processing_status VARCHAR(20) DEFAULT 'pending',
    processed_at TIMESTAMP,
    display_order INTEGER DEFAULT 0,
    created_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
    updated_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
);

CREATE INDEX IF NOT EXISTS idx_products_sku ON products(sku);
CREATE INDEX IF NOT EXISTS idx_customers_email ON customers(email);
CREATE INDEX IF NOT EXISTS idx_orders_customer ON orders(customer_id);
CREATE INDEX IF NOT EXISTS idx_order_items_order ON order_items(order_id);
CREATE INDEX IF NOT EXISTS idx_images_imageable ON images(imageable_type, imageable_id);
CREATE INDEX IF NOT EXISTS idx_images_variant ON images(variant);
CREATE INDEX IF NOT EXISTS idx_images_parent ON images(parent_id) WHERE parent_id IS NOT NULL;
CREATE INDEX IF NOT EXISTS idx_images_status ON images(processing_status);
CREATE INDEX IF NOT EXISTS idx_images_display_order ON images(imageable_type, imageable_id, display_order);
"##;

/// Privileges on every table and sequence of the tenant database for `role`.
pub fn grant_statements(role: &str) -> String {
    let role = quote_identifier(role);
    format!(
        "GRANT ALL PRIVILEGES ON ALL TABLES IN SCHEMA public TO {role};\n\
         GRANT ALL PRIVILEGES ON ALL SEQUENCES IN SCHEMA public TO {role};"
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_every_create_checks_existence() {
        for line in TENANT_SCHEMA.lines().map(str::trim) {
            if line.starts_with("CREATE TABLE") {
                assert!(line.starts_with("CREATE TABLE IF NOT EXISTS"), "{line}");
            }
            if line.starts_with("CREATE INDEX") {
                assert!(line.starts_with("CREATE INDEX IF NOT EXISTS"), "{line}");
            }
        }
        // enum types sit in DO blocks that swallow duplicates
        assert_eq!(TENANT_SCHEMA.matches("CREATE TYPE").count(), 2);
        assert_eq!(TENANT_SCHEMA.matches("duplicate_object").count(), 2);
    }

    #[test]
    fn test_default_settings_row_is_idempotent() {
        let insert = TENANT_SCHEMA
            .split(';')
            .find(|s| s.contains("INSERT INTO settings"))
            .unwrap();
        assert!(insert.contains("ON CONFLICT (key) DO NOTHING"));
        assert!(insert.contains("'interface'"));
    }

    #[test]
    fn test_grant_quotes_role() {
        let sql = grant_statements("saas_api");
        assert!(sql.contains("ALL TABLES IN SCHEMA public TO \"saas_api\""));
        assert!(sql.contains("ALL SEQUENCES IN SCHEMA public TO \"saas_api\""));

        let hostile = grant_statements("x\"; DROP DATABASE y; --");
        assert!(hostile.contains("\"x\"\"; DROP DATABASE y; --\""));
    }
}
