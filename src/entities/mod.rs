pub mod collection_member;
pub mod customer_group_member;
pub mod discount;
pub mod discount_usage;
pub mod number_sequence;
pub mod order;
pub mod order_item;
pub mod product;
pub mod product_variant;
pub mod tax_rate;
pub mod tax_zone;

pub use collection_member::Entity as CollectionMember;
pub use customer_group_member::Entity as CustomerGroupMember;
pub use discount::{Entity as Discount, Model as DiscountModel};
pub use discount_usage::{Entity as DiscountUsage, Model as DiscountUsageModel};
pub use number_sequence::Entity as NumberSequence;
pub use order::{Entity as Order, Model as OrderModel};
pub use order_item::{Entity as OrderItem, Model as OrderItemModel};
pub use product::{Entity as Product, Model as ProductModel};
pub use product_variant::{Entity as ProductVariant, Model as ProductVariantModel};
pub use tax_rate::{Entity as TaxRate, Model as TaxRateModel};
pub use tax_zone::{Entity as TaxZone, Model as TaxZoneModel};
