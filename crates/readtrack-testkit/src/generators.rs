//! Proptest generators for property-based testing.

use proptest::prelude::*;

use readtrack_core::{
    ChannelId, DeviceType, PostId, Receipt, ReceiptBuilder, UserId, VisibilityMode,
};

/// Generate a valid identifier.
pub fn id() -> impl Strategy<Value = String> {
    "[a-z0-9][a-z0-9_-]{0,25}".prop_map(String::from)
}

pub fn post_id() -> impl Strategy<Value = PostId> {
    id().prop_map(PostId::new)
}

/// User ids drawn from a small pool so receipts collide on users.
pub fn user_id() -> impl Strategy<Value = UserId> {
    (0u8..8).prop_map(|n| UserId::new(format!("user{}", n)))
}

pub fn channel_id() -> impl Strategy<Value = ChannelId> {
    id().prop_map(ChannelId::new)
}

/// Generate a positive millisecond timestamp.
pub fn timestamp() -> impl Strategy<Value = i64> {
    1i64..=4_102_444_800_000
}

pub fn device_type() -> impl Strategy<Value = DeviceType> {
    prop::sample::select(DeviceType::ALL.to_vec())
}

pub fn visibility_mode() -> impl Strategy<Value = VisibilityMode> {
    prop_oneof![Just(VisibilityMode::ShowAll), Just(VisibilityMode::ShowNone)]
}

/// Parameters for generating a receipt.
#[derive(Debug, Clone)]
pub struct ReceiptParams {
    pub post_id: PostId,
    pub user_id: UserId,
    pub channel_id: ChannelId,
    pub read_at: i64,
    pub device_type: DeviceType,
    pub device_id: Option<String>,
}

impl Arbitrary for ReceiptParams {
    type Parameters = ();
    type Strategy = BoxedStrategy<Self>;

    fn arbitrary_with(_: Self::Parameters) -> Self::Strategy {
        (
            post_id(),
            user_id(),
            channel_id(),
            timestamp(),
            device_type(),
            prop::option::of(id()),
        )
            .prop_map(
                |(post_id, user_id, channel_id, read_at, device_type, device_id)| ReceiptParams {
                    post_id,
                    user_id,
                    channel_id,
                    read_at,
                    device_type,
                    device_id,
                },
            )
            .boxed()
    }
}

/// Build a receipt from parameters. `created_at` equals `read_at`.
pub fn receipt_from_params(params: &ReceiptParams) -> Receipt {
    ReceiptBuilder::new(
        params.post_id.clone(),
        params.user_id.clone(),
        params.channel_id.clone(),
    )
    .read_at(params.read_at)
    .created_at(params.read_at)
    .device_id(params.device_id.as_deref())
    .device_type(params.device_type)
    .build()
}

/// Generate a valid receipt.
pub fn receipt() -> impl Strategy<Value = Receipt> {
    any::<ReceiptParams>().prop_map(|p| receipt_from_params(&p))
}

/// Receipts for one post, at most one per user.
pub fn receipts_for_post(post_id: PostId, max: usize) -> impl Strategy<Value = Vec<Receipt>> {
    prop::collection::btree_map(user_id(), timestamp(), 0..=max).prop_map(move |reads| {
        reads
            .into_iter()
            .map(|(user, read_at)| {
                ReceiptBuilder::new(post_id.clone(), user, ChannelId::new("channel"))
                    .read_at(read_at)
                    .created_at(read_at)
                    .build()
            })
            .collect()
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use readtrack_core::validate_receipt;

    proptest! {
        #[test]
        fn generated_receipts_are_valid(r in receipt()) {
            prop_assert!(validate_receipt(&r).is_ok());
        }

        #[test]
        fn receipts_for_post_have_distinct_users(rs in receipts_for_post(PostId::new("p"), 8)) {
            let mut users: Vec<&UserId> = rs.iter().map(|r| &r.user_id).collect();
            users.sort();
            users.dedup();
            prop_assert_eq!(users.len(), rs.len());
        }
    }
}
