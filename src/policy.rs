use ulid::Ulid;

use crate::model::Identity;

/// Who a new booking would belong to. `None` means the identity may not
/// create bookings at all — an admin-only identity has nobody to book for.
pub fn create_owner(identity: &Identity) -> Option<Ulid> {
    identity.user_id
}

/// Cancellation is allowed for the booking's owner and for admins.
pub fn can_cancel(identity: &Identity, owner: Ulid) -> bool {
    identity.is_admin() || identity.is_owner(owner)
}
