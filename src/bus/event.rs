use serde::{Deserialize, Serialize};
use strum_macros::{AsRefStr, Display, EnumCount, EnumIter, EnumString, IntoStaticStr};

/// Closed set of event kinds exchanged between the mall subsystems.
///
/// The kind decides routing only. Which payload travels with which kind is
/// a convention between producer and consumer; the broker never checks it.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    Serialize,
    Deserialize,
    Display,
    AsRefStr,
    IntoStaticStr,
    EnumIter,
    EnumString,
    EnumCount,
)]
pub enum EventKind {
    // Accounts
    UserRegisterRequested,
    UserRegisterSuccess,
    UserRegisterFailed,
    UserLoginRequest,
    UserLoginSuccess,
    UserLoginFailed,
    AccountViewRequested,
    AccountViewReturned,

    // Items
    ItemBrowseRequested,
    ItemSearchRequested,
    ItemListReturned,
    ItemUploadRequested,
    ItemEditRequested,
    ItemRemoveRequested,
    ItemRefillRequested,
    ItemUpdateSuccess,
    ItemLikeRequested,
    ItemRankingRequested,

    // Orders
    PurchaseRequested,
    OrderCreatedRequested,
    OrderConfirmed,
    OrderPaymentFailed,
    OrderCancelRequested,
    OrderCancelSuccess,
    OrderHistoryRequested,
    OrderHistoryReturned,

    // Payments
    PaymentAuthorizationRequested,
    PaymentAuthorized,
    PaymentDenied,
    EmailReceiptRequested,
    RefundProcessRequested,
    RefundSuccess,
    RefundFailed,

    // Shipping
    ShippingRequested,
    ShippingStatusUpdated,
    ShippingPickedUp,
    ShippingInTransit,
    ShippingOutForDelivery,
    ShippingDelivered,

    // Messaging
    MessageSendRequested,
    MessageSentConfirmation,
    MessageReplyRequested,
    MessageHistoryRequested,
    MessageHistoryReturned,
    MessageListReturned,
    MessageMarkedAsRead,
    ConversationListRequested,
    ConversationListReturned,
    ConversationLoadRequested,
    ConversationMessagesReturned,
    UnreadMessagesRequested,
    UnreadMessagesReturned,
    CustomerNotifiedNewReply,
    StaffNotifiedNewMessage,

    // Notifications
    NotificationSent,
    NotificationFailed,

    // Wishlist
    WishlistAddRequested,
    WishlistAddSuccess,
    WishlistAddFailed,
    WishlistRemoveRequested,
    WishlistRemoveSuccess,
    WishlistRemoveFailed,
    WishlistViewRequested,
    WishlistDetailsReturned,

    // Reporting
    ReportViewRequested,
    ReportDetailsReturned,
    ReportGenerationComplete,
    TimerTriggerDailyReport,
    TimerTriggerMonthlyReport,
}

impl EventKind {
    /// Whether the kind names a request that some subsystem answers.
    pub fn is_request(self) -> bool {
        let name: &'static str = self.into();
        name.ends_with("Requested") || name.ends_with("Request")
    }

    /// Whether the kind is produced by the scheduler rather than a user.
    pub fn is_timer(self) -> bool {
        matches!(
            self,
            Self::TimerTriggerDailyReport | Self::TimerTriggerMonthlyReport
        )
    }
}
