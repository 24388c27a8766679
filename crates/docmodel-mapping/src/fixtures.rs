//! Shared test model: people, their pets and addresses.

use crate::builder::{ClassDef, MappingBuilder, PropertyDef, TypeRef};
use crate::config::{IdentityKind, MappingConfig};
use crate::flags::PropertyFlags;
use crate::mapping::EnumMapping;
use crate::registry::MappingRegistry;

pub(crate) fn config() -> MappingConfig {
    MappingConfig {
        identity: IdentityKind::Sequential,
        ..MappingConfig::default()
    }
}

pub(crate) fn registry() -> MappingRegistry {
    MappingBuilder::new(config())
        .add(
            ClassDef::embeddable("Address")
                .property(PropertyDef::new("street", TypeRef::String))
                .property(PropertyDef::new("city", TypeRef::String))
                .property(PropertyDef::new("previous", TypeRef::class("Address")).nullable()),
        )
        .add(
            ClassDef::entity("Person")
                .collection("people")
                .property(PropertyDef::new("name", TypeRef::String))
                .property(PropertyDef::new("age", TypeRef::Number))
                .property(
                    PropertyDef::new(
                        "mood",
                        TypeRef::Enum(EnumMapping::named(["happy", "grumpy"])),
                    ),
                )
                .property(PropertyDef::new("tags", TypeRef::array(TypeRef::String)))
                .property(PropertyDef::new("address", TypeRef::class("Address")))
                .property(
                    PropertyDef::new("parents", TypeRef::array(TypeRef::class("Person")))
                        .cascade(PropertyFlags::CASCADE_SAVE),
                )
                .property(
                    PropertyDef::new("children", TypeRef::array(TypeRef::class("Person")))
                        .inverse_of("parents"),
                )
                .property(
                    PropertyDef::new("pet", TypeRef::class("Animal"))
                        .cascade(PropertyFlags::CASCADE_ALL)
                        .orphan_removal(),
                )
                .property(PropertyDef::new("scratch", TypeRef::Any).ignored()),
        )
        .add(
            ClassDef::entity("Animal")
                .collection("animals")
                .property(PropertyDef::new("name", TypeRef::String)),
        )
        .add(
            ClassDef::entity("Dog")
                .extends("Animal")
                .property(PropertyDef::new("breed", TypeRef::String)),
        )
        .add(ClassDef::entity("Cat").extends("Animal").discriminator("cat"))
        .build()
        .expect("fixture mappings build")
}
